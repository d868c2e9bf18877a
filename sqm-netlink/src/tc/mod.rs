//! # Traffic Control Requests
//!
//! Builders for the Linux traffic control (tc) objects sqm manages, encoded as rtnetlink
//! messages. The resulting hierarchy for a physical link `ppp0`:
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │ ppp0                         │          │ ifb4ppp0                     │
//! │                              │          │                              │
//! │  root: CAKE 8012:            │          │  root: CAKE 8013:            │
//! │   (egress rate)              │          │   (ingress rate)             │
//! │                              │  mirred  │                              │
//! │  ingress qdisc ffff: ────────┼─────────►│  egress                      │
//! │   └ u32 match-all, prio 10   │          │                              │
//! └──────────────────────────────┘          └──────────────────────────────┘
//! ```
//!
//! See [`handle`] for the numbering scheme.

pub mod cake;
pub mod filter;
pub mod handle;
pub mod ingress;
pub(crate) mod nla;
