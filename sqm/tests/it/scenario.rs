//! The whole engine against the in-memory kernel.

use std::{sync::Arc, time::Duration};

use clap::Parser as _;
use sqm::{
    Direction, Manager, Options, SharedState,
    controller::{Controller, DeviceController, ShaperController},
    names, register_controllers,
};
use sqm_netlink::{
    LinkSpec, Netlink,
    tc::handle::{INGRESS_SHAPER_MAJOR, make_handle},
};

use crate::mock::{Call, MockNetlink, ScriptedRates};

#[tokio::test]
async fn physical_link_to_shaped_ifb() {
    let _ = tracing_subscriber::fmt::try_init();

    let mock = MockNetlink::new();
    mock.add_physical("ppp0", 2, 1492);
    let netlink: Arc<dyn Netlink> = mock.clone();
    let state = Arc::new(SharedState::new());

    let mut root = DeviceController::root("ppp0", netlink.clone(), state.clone());
    let mut ifb = DeviceController::ifb("ppp0", netlink.clone(), state.clone());
    let mut shaper = ShaperController::new(Direction::Ingress, netlink, state.clone());

    root.reconcile().await.unwrap();
    ifb.reconcile().await.unwrap();
    assert!(mock.calls().contains(&Call::AddLink(LinkSpec::ifb("ifb4ppp0", 1492))));
    let ifb_index = state.ifb_device().unwrap().index;

    assert!(shaper.reconcile().await.unwrap_err().is_not_ready());
    state.set_ingress_rate(25_000);
    shaper.reconcile().await.unwrap();

    let programmed: Vec<_> = mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::ReplaceCake(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(programmed.len(), 1);
    assert_eq!(programmed[0].inner.interface_index, ifb_index as i32);
    assert_eq!(programmed[0].inner.handle, make_handle(INGRESS_SHAPER_MAJOR, 0));
    assert_eq!(programmed[0].options.base_rate, 3_125_000);

    mock.clear_calls();
    shaper.reconcile().await.unwrap();
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_run_converges_then_cleans_up() {
    let _ = tracing_subscriber::fmt::try_init();

    let mock = MockNetlink::new();
    mock.add_physical("ppp0", 2, 1492);
    let rates = ScriptedRates::new();
    rates.set(25_000, 5_000);

    let options = Options::try_parse_from(["sqm"]).unwrap();
    let mut manager = Manager::new();
    register_controllers(&mut manager, &options, mock.clone(), Box::new(rates.clone()));
    assert_eq!(
        manager.controller_names().collect::<Vec<_>>(),
        [
            names::RATE_POLLER,
            names::ROOT_DEVICE,
            names::IFB_DEVICE,
            names::EGRESS_SHAPER,
            names::INGRESS_SHAPER,
            names::REDIRECTOR,
        ]
    );

    let state = manager.state().clone();
    let shutdown = manager.shutdown_token();
    let running = tokio::spawn(manager.run());

    // Registration order lets everything converge in the startup pass.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let ifb = mock.link("ifb4ppp0").unwrap();
    assert_eq!(ifb.mtu, 1492);
    assert_eq!(state.ingress_rate(), 25_000);
    assert_eq!(state.egress_rate(), 5_000);
    assert_eq!(mock.qdiscs_on(ifb.index as i32).len(), 1);
    // Egress shaper and ingress qdisc.
    assert_eq!(mock.qdiscs_on(2).len(), 2);
    assert_eq!(mock.filters_on(2).len(), 1);

    // A full shape interval later nothing has been reprogrammed.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.count(|c| matches!(c, Call::ReplaceCake(_))), 2);
    assert_eq!(mock.count(|c| matches!(c, Call::AddRedirectFilter(_))), 1);
    assert!(rates.queries() > 1);

    // A retrain is picked up on the next shape tick.
    rates.set(24_000, 5_000);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.count(|c| matches!(c, Call::ReplaceCake(_))), 3);

    shutdown.cancel();
    running.await.unwrap();

    assert_eq!(mock.count(|c| *c == Call::DeleteLink(ifb.index)), 1);
    assert_eq!(mock.count(|c| matches!(c, Call::DeleteLink(_))), 1);
    assert_eq!(mock.count(|c| matches!(c, Call::DeleteQdisc(_))), 1);
    assert!(mock.link("ifb4ppp0").is_none());
    assert!(mock.filters_on(2).is_empty());
    // The egress shaper stays on the physical device.
    assert_eq!(mock.qdiscs_on(2).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_rate_source_holds_back_shaping_only() {
    let _ = tracing_subscriber::fmt::try_init();

    let mock = MockNetlink::new();
    mock.add_physical("ppp0", 2, 1492);
    let rates = ScriptedRates::new();
    rates.fail();

    let options = Options::try_parse_from(["sqm", "--interface", "ppp0"]).unwrap();
    let mut manager = Manager::new();
    register_controllers(&mut manager, &options, mock.clone(), Box::new(rates.clone()));
    let state = manager.state().clone();
    let shutdown = manager.shutdown_token();
    let running = tokio::spawn(manager.run());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!state.ingress_rate_known());
    assert!(state.ifb_device_ready());
    assert_eq!(mock.count(|c| matches!(c, Call::ReplaceCake(_))), 0);
    assert_eq!(mock.filters_on(2).len(), 1);

    // The modem comes back: shapers converge on their next tick.
    rates.set(25_000, 5_000);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.count(|c| matches!(c, Call::ReplaceCake(_))), 2);

    shutdown.cancel();
    running.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_leaves_kernel_untouched() {
    let _ = tracing_subscriber::fmt::try_init();

    let mock = MockNetlink::new();
    mock.add_physical("ppp0", 2, 1492);
    let rates = ScriptedRates::new();
    rates.set(25_000, 5_000);

    let options = Options::try_parse_from(["sqm"]).unwrap();
    let mut manager = Manager::new();
    register_controllers(&mut manager, &options, mock.clone(), Box::new(rates.clone()));

    manager.shutdown_token().cancel();
    manager.run().await;

    assert!(mock.calls().is_empty(), "{:?}", mock.calls());
    assert!(mock.link("ifb4ppp0").is_none());
    assert_eq!(rates.queries(), 0);
}
