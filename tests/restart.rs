mod common;

use common::*;
use maolan_vst3_bridge::{
    BridgeOptions, CompatibilityFlags, ComponentHandler, HostNotification, ParameterChange,
    RestartFlags, RouteProcessorChange,
};

fn synchronous() -> BridgeOptions {
    BridgeOptions {
        compat: CompatibilityFlags {
            synchronous_restart: true,
            ..CompatibilityFlags::default()
        },
        ..options()
    }
}

#[test]
fn restart_waits_for_idle() {
    let (mock, instance, rx) = active_instance();
    mock.state().latency = 128;

    assert!(mock.host().restart_component(RestartFlags::LATENCY_CHANGED));
    assert!(instance.host().pending_restart().contains(RestartFlags::LATENCY_CHANGED));
    assert_eq!(instance.latency(), 0);

    mock.clear_calls();
    instance.idle();
    assert_eq!(instance.latency(), 128);
    assert!(instance.host().pending_restart().is_empty());
    assert!(instance.is_active());
    assert_eq!(
        mock.calls(),
        vec![
            "set_processing false",
            "set_active false",
            "setup_processing 64",
            "set_active true",
            "set_processing true",
        ]
    );

    let notifications = drain(&rx);
    assert!(notifications.contains(&HostNotification::LatencyChanged { samples: 128 }));
    assert!(notifications.contains(&HostNotification::RestartServiced(RestartFlags::LATENCY_CHANGED)));
    let batched: Vec<_> = notifications
        .iter()
        .filter_map(|n| match n {
            HostNotification::ProcessorChange(change) => Some(*change),
            _ => None,
        })
        .collect();
    assert_eq!(batched.len(), 1);
    assert!(batched[0].contains(RouteProcessorChange::LATENCY));
}

#[test]
fn synchronous_restart_is_serviced_immediately() {
    let mock = Mock::default();
    let (instance, rx) = host_instance(&mock, synchronous());
    instance.activate();
    mock.state().latency = 32;

    mock.host().restart_component(RestartFlags::LATENCY_CHANGED);
    assert_eq!(instance.latency(), 32);
    assert!(instance.host().pending_restart().is_empty());
    assert!(drain(&rx).contains(&HostNotification::RestartServiced(RestartFlags::LATENCY_CHANGED)));
}

#[test]
fn restart_from_process_is_deferred_even_when_synchronous() {
    let mock = Mock::default();
    let (instance, _rx) = host_instance(&mock, synchronous());
    instance.activate();
    {
        let mut state = mock.state();
        state.latency = 16;
        state.restart_in_process = Some(RestartFlags::LATENCY_CHANGED);
    }

    assert!(run_cycle(&instance, BLOCK));
    assert!(instance.host().pending_restart().contains(RestartFlags::LATENCY_CHANGED));
    assert_eq!(instance.latency(), 0);

    instance.idle();
    assert_eq!(instance.latency(), 16);
}

#[test]
fn parameter_value_restart_resyncs_the_shadow() {
    let (mock, instance, _rx) = active_instance();
    mock.state().values.insert(GAIN, 0.9);

    mock.host().restart_component(RestartFlags::PARAM_VALUES_CHANGED);
    assert_eq!(instance.get_parameter(0), Some(0.5));
    instance.idle();

    assert_eq!(instance.get_parameter(0), Some(0.9));
    assert_eq!(
        instance.poll_parameter_changes(),
        vec![ParameterChange::ValueChange {
            index: 0,
            value: 0.9,
            recorded: false,
        }]
    );
}

#[test]
fn nested_blocks_flush_once() {
    let (_mock, instance, rx) = active_instance();
    drain(&rx);

    instance.block_notifications();
    instance.block_notifications();
    assert!(instance.enable_io(0b1111, 0b11));
    assert!(instance.enable_io(0b11, 0b11));
    instance.resume_notifications();
    assert!(drain(&rx).is_empty());

    instance.resume_notifications();
    assert_eq!(
        drain(&rx),
        vec![HostNotification::ProcessorChange(RouteProcessorChange::CONFIGURATION)]
    );
    assert_eq!(instance.host().batcher().flush_count(), 1);

    // Unbalanced resume is ignored.
    instance.resume_notifications();
    assert!(drain(&rx).is_empty());
}
