mod device;
mod mock;
mod scenario;
