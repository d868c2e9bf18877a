use std::sync::Arc;

use sqm::{Dependency, Error, SharedState, controller::Controller, controller::DeviceController};
use sqm_netlink::{LinkSpec, Netlink, OperState};

use crate::mock::{Call, MockNetlink};

fn setup() -> (Arc<MockNetlink>, Arc<dyn Netlink>, Arc<SharedState>) {
    let _ = tracing_subscriber::fmt::try_init();

    let mock = MockNetlink::new();
    let netlink: Arc<dyn Netlink> = mock.clone();
    (mock, netlink, Arc::new(SharedState::new()))
}

#[tokio::test]
async fn root_device_is_published() {
    let (mock, netlink, state) = setup();
    mock.add_physical("ppp0", 2, 1492);

    let mut root = DeviceController::root("ppp0", netlink, state.clone());
    root.reconcile().await.unwrap();

    let published = state.root_device().unwrap();
    assert_eq!((published.index, published.mtu), (2, 1492));
    assert!(state.root_device_ready());

    // Nothing is ever changed on the physical device.
    root.reconcile().await.unwrap();
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn missing_root_device_is_a_lookup_failure() {
    let (_mock, netlink, state) = setup();

    let mut root = DeviceController::root("ppp0", netlink, state.clone());
    let err = root.reconcile().await.unwrap_err();

    assert!(matches!(&err, Error::Lookup { name, .. } if name == "ppp0"), "{err}");
    assert!(!err.is_not_ready());
    assert!(!state.root_device_ready());
}

#[tokio::test]
async fn ifb_waits_for_root_device() {
    let (mock, netlink, state) = setup();
    mock.add_physical("ppp0", 2, 1492);

    let mut ifb = DeviceController::ifb("ppp0", netlink, state.clone());
    let err = ifb.reconcile().await.unwrap_err();

    assert!(matches!(err, Error::NotReady(Dependency::RootDevice)));
    assert!(mock.calls().is_empty());
    assert!(mock.link("ifb4ppp0").is_none());
}

#[tokio::test]
async fn ifb_is_created_with_root_mtu_and_brought_up() {
    let (mock, netlink, state) = setup();
    mock.add_physical("ppp0", 2, 1492);

    let mut root = DeviceController::root("ppp0", netlink.clone(), state.clone());
    let mut ifb = DeviceController::ifb("ppp0", netlink, state.clone());
    assert_eq!(ifb.name(), "ifb4ppp0");

    root.reconcile().await.unwrap();
    ifb.reconcile().await.unwrap();

    let created = mock.link("ifb4ppp0").unwrap();
    assert_eq!(created.mtu, 1492);
    assert_eq!(created.oper_state, OperState::Unknown);
    assert_eq!(
        mock.calls(),
        vec![Call::AddLink(LinkSpec::ifb("ifb4ppp0", 1492)), Call::SetLinkUp(created.index)]
    );

    // Published in the same pass.
    let published = state.ifb_device().unwrap();
    assert_eq!((published.index, published.mtu), (created.index, 1492));

    // Converged: nothing more to do.
    mock.clear_calls();
    ifb.reconcile().await.unwrap();
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn existing_ifb_is_adopted() {
    let (mock, netlink, state) = setup();
    mock.add_physical("ppp0", 2, 1492);
    mock.add_physical("ifb4ppp0", 9, 1492);

    // The root device isn't needed when nothing has to be created.
    let mut ifb = DeviceController::ifb("ppp0", netlink, state.clone());
    ifb.reconcile().await.unwrap();

    assert_eq!(state.ifb_device().unwrap().index, 9);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn ifb_teardown_deletes_published_device_once() {
    let (mock, netlink, state) = setup();
    mock.add_physical("ppp0", 2, 1492);

    let mut root = DeviceController::root("ppp0", netlink.clone(), state.clone());
    let mut ifb = DeviceController::ifb("ppp0", netlink, state.clone());
    root.reconcile().await.unwrap();
    ifb.reconcile().await.unwrap();
    let index = state.ifb_device().unwrap().index;

    root.reconcile_delete().await;
    ifb.reconcile_delete().await;

    assert!(mock.link("ifb4ppp0").is_none());
    assert!(mock.link("ppp0").is_some());
    assert_eq!(mock.count(|c| matches!(c, Call::DeleteLink(_))), 1);
    assert!(mock.calls().contains(&Call::DeleteLink(index)));

    // A second teardown finds the device gone and only logs.
    ifb.reconcile_delete().await;
}

#[tokio::test]
async fn teardown_without_reconcile_is_a_noop() {
    let (mock, netlink, state) = setup();
    mock.add_physical("ppp0", 2, 1492);
    mock.add_physical("ifb4ppp0", 9, 1492);

    let mut root = DeviceController::root("ppp0", netlink.clone(), state.clone());
    let mut ifb = DeviceController::ifb("ppp0", netlink, state);
    root.reconcile_delete().await;
    ifb.reconcile_delete().await;

    assert!(mock.calls().is_empty());
    assert!(mock.link("ifb4ppp0").is_some());
}
