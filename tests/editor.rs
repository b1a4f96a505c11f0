mod common;

use common::*;
use maolan_vst3_bridge::{ContextInfo, ContextValue, HostNotification, ParameterChange, PlugFrame, UnitHandler};

#[test]
fn view_is_created_on_first_request() {
    let (mock, instance, rx) = active_instance();

    assert!(instance.has_editor());
    assert!(mock.calls_matching("create_view").is_empty());
    assert_eq!(instance.view_size(), None);

    let handle = instance.view().unwrap();
    assert_eq!(instance.view(), Some(handle));
    assert_eq!(mock.calls_matching("create_view").len(), 1);
    assert_eq!(instance.view_size(), Some((640, 480)));

    assert!(instance.resize_view(800, 600));
    assert_eq!(instance.view_size(), Some((800, 600)));

    assert!(mock.host().resize_view(1024, 768));
    assert!(!mock.host().resize_view(0, 768));
    assert_eq!(
        drain(&rx),
        vec![HostNotification::ViewResized {
            width: 1024,
            height: 768,
        }]
    );

    instance.close_view();
    instance.close_view();
    assert_eq!(mock.calls_matching("view.removed").len(), 1);
    assert!(!instance.resize_view(10, 10));
}

#[test]
fn plugins_without_editor_create_no_view() {
    let mock = Mock::default();
    mock.state().has_editor = false;
    let (instance, _rx) = host_instance(&mock, options());

    assert!(!instance.has_editor());
    assert_eq!(instance.view(), None);
}

#[test]
fn factory_presets_drive_the_program_parameter() {
    let (mock, instance, _rx) = active_instance();

    assert_eq!(instance.factory_preset_count(), 3);
    assert_eq!(instance.factory_preset_names(), vec!["Init", "Warm", "Bright"]);

    assert!(instance.select_factory_preset(1));
    assert_eq!(instance.get_parameter(3), Some(0.5));
    assert!(!instance.select_factory_preset(3));

    run_cycle(&instance, BLOCK);
    assert_eq!(mock.state().seen_changes.last().unwrap(), &vec![(PROGRAM, 0, 0.5)]);
    assert_eq!(
        instance.poll_parameter_changes(),
        vec![ParameterChange::ValueChange {
            index: 3,
            value: 0.5,
            recorded: false,
        }]
    );
}

#[test]
fn program_list_changes_refresh_at_idle() {
    let (mock, instance, rx) = active_instance();
    mock.state().program_names.push("Dark".into());

    assert!(mock.host().notify_program_list_change(0, -1));
    assert_eq!(drain(&rx), vec![HostNotification::PresetsChanged]);
    assert_eq!(instance.factory_preset_count(), 3);

    instance.idle();
    assert_eq!(instance.factory_preset_count(), 4);
}

#[test]
fn user_presets_are_registered_by_name() {
    let (_mock, instance, rx) = active_instance();

    instance.register_user_preset("Vocals", "file:///presets/vocals.vstpreset");
    instance.register_user_preset("Vocals", "file:///presets/vocals-2.vstpreset");
    let presets = instance.user_presets();
    assert_eq!(presets.len(), 1);
    assert_eq!(presets["Vocals"], "file:///presets/vocals-2.vstpreset");
    assert_eq!(
        drain(&rx),
        vec![HostNotification::PresetsChanged, HostNotification::PresetsChanged]
    );
}

#[test]
fn context_values_are_shared_both_ways() {
    let (mock, instance, _rx) = active_instance();

    instance.set_context_value("channel/name", ContextValue::Str("Lead".into()));
    assert_eq!(
        instance.context_value("channel/name"),
        Some(ContextValue::Str("Lead".into()))
    );
    assert_eq!(mock.calls_matching("context_info_changed"), vec!["context_info_changed channel/name"]);

    assert!(mock.host().set_context_value("channel/color", ContextValue::Int(0xff0000)));
    assert_eq!(instance.context_value("channel/color"), Some(ContextValue::Int(0xff0000)));
    assert_eq!(mock.calls_matching("context_info_changed").len(), 1);
    assert_eq!(instance.context_value("missing"), None);
}
