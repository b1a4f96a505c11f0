mod common;

use common::*;
use maolan_vst3_bridge::plugin::speaker;
use maolan_vst3_bridge::{BridgeOptions, BusDirection, BusType, CompatibilityFlags, MediaType};

#[test]
fn negotiation_tries_each_bus() {
    let mock = Mock::default();
    let (instance, _rx) = host_instance(&mock, options());

    let inputs = instance.audio_buses(BusDirection::Input);
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].supported, vec![0, 1, 2]);
    assert_eq!(inputs[1].supported, vec![0, 2]);
    assert_eq!(inputs[1].used_channel_count, 0);
    assert_eq!(instance.n_audio_aux_in(), 1);
    assert_eq!(instance.n_audio_aux_out(), 0);

    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Input, None), 2);
    assert_eq!(
        instance.count_channels(MediaType::Audio, BusDirection::Input, Some(BusType::Aux)),
        0
    );
    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Output, None), 2);
    assert_eq!(instance.count_channels(MediaType::Event, BusDirection::Input, None), 16);

    let calls = mock.calls();
    assert!(calls.contains(&"activate_bus Audio Input 1 false".to_string()));
    assert!(calls.contains(&"activate_bus Event Input 0 true".to_string()));
}

#[test]
fn enable_io_follows_the_mask() {
    let (mock, instance, _rx) = active_instance();

    assert!(instance.enable_io(0b1111, 0b11));
    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Input, None), 4);
    assert_eq!(
        instance.count_channels(MediaType::Audio, BusDirection::Input, Some(BusType::Aux)),
        2
    );
    assert!(instance.is_active());

    assert!(instance.enable_io(0b01, 0b01));
    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Input, None), 1);
    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Output, None), 1);
    let (ins, outs) = mock.state().arrangements.clone();
    assert_eq!(ins[0], speaker::MONO);
    assert_eq!(outs[0], speaker::MONO);

    assert!(run_cycle(&instance, BLOCK));
}

#[test]
fn rejected_masks_keep_the_previous_layout() {
    let (_mock, instance, _rx) = active_instance();

    // One sidechain channel is not a layout the plugin accepted.
    assert!(!instance.enable_io(0b0111, 0b11));
    assert!(!instance.enable_io(0b1_0000, 0b11));
    assert!(!instance.enable_io(0b11, 0b100));

    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Input, None), 2);
    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Output, None), 2);
    for bus in instance.audio_buses(BusDirection::Input) {
        assert!(bus.used_channel_count <= bus.channel_count);
    }
}

#[test]
fn single_channel_main_bus_forces_mono() {
    let mock = Mock::default();
    let options = BridgeOptions {
        compat: CompatibilityFlags {
            single_channel_main_bus: true,
            ..CompatibilityFlags::default()
        },
        ..options()
    };
    let (instance, _rx) = host_instance(&mock, options);

    assert_eq!(
        instance.count_channels(MediaType::Audio, BusDirection::Input, Some(BusType::Main)),
        1
    );
    assert_eq!(instance.count_channels(MediaType::Audio, BusDirection::Output, None), 1);
    assert_eq!(instance.audio_buses(BusDirection::Input)[0].supported, vec![0, 1]);
    assert_eq!(mock.state().arrangements.0[0], speaker::MONO);
}
