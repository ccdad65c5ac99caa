use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use pidee::backend::{GpioCall, MockGpioBackend};
use pidee::{
    ChangeFlags, DeviceConfig, DipChange, Direction, EdgeDetect, FeatureOverride, FeatureType,
    ListenerHandle, NumberingMode, Pidee, PideeError,
};

const BUTTON_PIN: u32 = 18;
const DIP_PINS: [u32; 8] = [17, 27, 22, 23, 24, 25, 5, 6];
const LED_RED_PIN: u32 = 13;
const LED_GREEN_PIN: u32 = 12;
const LED_BLUE_PIN: u32 = 19;

fn device_with(config: DeviceConfig) -> (Arc<MockGpioBackend>, Pidee<MockGpioBackend>) {
    let backend = Arc::new(MockGpioBackend::default());
    let device = Pidee::new(config, backend.clone()).expect("device setup");
    (backend, device)
}

fn default_device() -> (Arc<MockGpioBackend>, Pidee<MockGpioBackend>) {
    device_with(DeviceConfig::default())
}

#[test]
fn auto_setup_exports_and_pulls_up_inputs() {
    let (backend, _device) = default_device();
    let calls = backend.calls();

    assert_eq!(calls[0], GpioCall::Export(BUTTON_PIN, Direction::Input));
    assert_eq!(calls[1], GpioCall::PullUp(BUTTON_PIN));
    assert!(calls.contains(&GpioCall::Export(LED_RED_PIN, Direction::Output)));
    assert!(!calls.contains(&GpioCall::PullUp(LED_RED_PIN)));

    let exports = calls
        .iter()
        .filter(|c| matches!(c, GpioCall::Export(..)))
        .count();
    let pull_ups = calls
        .iter()
        .filter(|c| matches!(c, GpioCall::PullUp(..)))
        .count();
    assert_eq!(exports, 12);
    assert_eq!(pull_ups, 9);

    let sys_mode = calls.iter().position(|c| *c == GpioCall::SysMode).unwrap();
    let first_interrupt = calls
        .iter()
        .position(|c| matches!(c, GpioCall::Interrupt(..)))
        .unwrap();
    assert!(sys_mode < first_interrupt);
}

#[test]
fn auto_setup_requires_bcm_numbering() {
    let backend = Arc::new(MockGpioBackend::default());
    let config = DeviceConfig {
        numbering_mode: NumberingMode::Physical,
        ..DeviceConfig::default()
    };

    let result = Pidee::new(config, backend.clone());
    assert!(matches!(
        result,
        Err(PideeError::NumberingModeUnsupported(NumberingMode::Physical))
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn events_use_configured_numbering_without_auto_setup() {
    let config = DeviceConfig {
        numbering_mode: NumberingMode::Physical,
        enable_auto_setup: false,
        ..DeviceConfig::default()
    };
    let (backend, device) = device_with(config);

    assert_eq!(device.resolve("button").unwrap(), 12);
    assert!(backend.has_interrupt(12));
    assert!(backend.has_interrupt(11));
    assert!(!backend.has_interrupt(33));
    assert!(
        backend
            .calls()
            .contains(&GpioCall::Interrupt(12, EdgeDetect::Both))
    );
}

#[test]
fn resolve_is_stable_and_rejects_unknown_names() {
    let (_backend, device) = default_device();

    assert_eq!(device.resolve("led-red").unwrap(), LED_RED_PIN);
    assert_eq!(device.resolve("led-red").unwrap(), LED_RED_PIN);
    assert!(matches!(
        device.resolve("led-yellow"),
        Err(PideeError::UnknownFeature(_))
    ));
    assert!(matches!(
        device.get("led-yellow"),
        Err(PideeError::UnknownFeature(_))
    ));
}

#[test]
fn write_to_input_fails_without_touching_hardware() {
    let (backend, device) = default_device();
    backend.clear_calls();

    let err = device.set("button", true).unwrap_err();
    assert!(matches!(
        err,
        PideeError::DirectionMismatch { direction: Direction::Input, .. }
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn read_from_output_fails() {
    let (backend, device) = default_device();
    backend.clear_calls();

    assert!(matches!(
        device.get("led-blue"),
        Err(PideeError::DirectionMismatch { direction: Direction::Output, .. })
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn button_value_reads_the_button_pin() {
    let (backend, device) = default_device();
    backend.set_level(BUTTON_PIN, false).unwrap();
    backend.clear_calls();

    assert!(!device.get_button_value().unwrap());
    assert_eq!(backend.calls(), vec![GpioCall::Read(BUTTON_PIN)]);
}

#[test]
fn dip_value_aggregates_switches_by_index() {
    let (backend, device) = default_device();
    for pin in DIP_PINS {
        backend.set_level(pin, false).unwrap();
    }
    backend.set_level(DIP_PINS[0], true).unwrap();
    backend.set_level(DIP_PINS[3], true).unwrap();

    assert_eq!(device.get_dip_switch_value().unwrap(), 0b0000_1001);
    assert!(device.get_dip_switch_at_index(3).unwrap());
    assert!(!device.get_dip_switch_at_index(7).unwrap());
    assert!(matches!(
        device.get_dip_switch_at_index(8),
        Err(PideeError::InvalidIndex(8))
    ));
}

#[test]
fn led_setters_drive_their_pins() {
    let (backend, device) = default_device();

    device.set_led_red(true).unwrap();
    device.set_led_green(false).unwrap();
    device.set_led_blue(true).unwrap();

    assert_eq!(backend.level(LED_RED_PIN), Some(true));
    assert_eq!(backend.level(LED_GREEN_PIN), Some(false));
    assert_eq!(backend.level(LED_BLUE_PIN), Some(true));
}

#[test]
fn overrides_change_the_resolved_pin() {
    let mut config = DeviceConfig::default();
    config.pin_map.insert(
        "led-red".to_string(),
        FeatureOverride {
            feature_type: FeatureType::Led,
            physical: 40,
            bcm: 21,
            logical: 29,
        },
    );
    let (backend, device) = device_with(config);

    device.set_led_red(true).unwrap();
    assert_eq!(backend.level(21), Some(true));
    assert_eq!(backend.level(LED_RED_PIN), None);
}

#[test]
fn one_interrupt_dispatches_to_button_listeners_in_order() {
    let (backend, device) = default_device();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    device.add_button_listener(move |v| s.lock().push((1, v)));
    let s = seen.clone();
    device.add_button_listener(move |v| s.lock().push((2, v)));

    backend.set_level_with_edge(BUTTON_PIN, false).unwrap();
    let drained = device.poll_and_dispatch().unwrap();

    assert_eq!(
        drained,
        ChangeFlags {
            button: true,
            dip: false
        }
    );
    assert_eq!(*seen.lock(), vec![(1, false), (2, false)]);
}

#[test]
fn repeated_interrupts_coalesce_into_one_dispatch() {
    let (backend, device) = default_device();
    let count = Arc::new(Mutex::new(0));

    let c = count.clone();
    device.add_button_listener(move |_| *c.lock() += 1);

    for _ in 0..10 {
        backend.trigger_edge(BUTTON_PIN).unwrap();
    }
    assert!(device.pending().button);

    device.poll_and_dispatch().unwrap();
    device.poll_and_dispatch().unwrap();

    assert_eq!(*count.lock(), 1);
    assert_eq!(device.pending(), ChangeFlags::default());
}

#[test]
fn polls_without_interrupts_invoke_nothing() {
    let (_backend, device) = default_device();
    let count = Arc::new(Mutex::new(0));

    let c = count.clone();
    device.add_button_listener(move |_| *c.lock() += 1);
    let c = count.clone();
    device.add_dip_listener(move |_| *c.lock() += 1);

    for _ in 0..5 {
        assert_eq!(device.poll_and_dispatch().unwrap(), ChangeFlags::default());
    }
    assert_eq!(*count.lock(), 0);
}

#[test]
fn dip_listeners_see_the_value_at_poll_time() {
    let (backend, device) = default_device();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    device.add_dip_listener(move |c| s.lock().push(*c));
    let s = seen.clone();
    device.add_dip_listener(move |c| s.lock().push(*c));

    backend.set_level_with_edge(DIP_PINS[0], false).unwrap();
    // changes again before the poll, no second dispatch expected
    backend.set_level(DIP_PINS[1], false).unwrap();
    device.poll_and_dispatch().unwrap();

    let expected = DipChange::new(0xFF, 0xFC);
    assert_eq!(*seen.lock(), vec![expected, expected]);
    assert_eq!(expected.index(), Some(0));
    assert_eq!(expected.changed_indices().collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn glitch_edge_dispatches_with_empty_diff() {
    let (backend, device) = default_device();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    device.add_dip_listener(move |c| s.lock().push(*c));

    backend.trigger_edge(DIP_PINS[5]).unwrap();
    device.poll_and_dispatch().unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].value, 0xFF);
    assert_eq!(seen[0].index(), None);
}

#[test]
fn dip_index_listener_only_fires_for_its_switch() {
    let (backend, device) = default_device();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    device
        .add_dip_index_listener(2, move |c| s.lock().push(c.value))
        .unwrap();
    assert!(matches!(
        device.add_dip_index_listener(8, |_| {}),
        Err(PideeError::InvalidIndex(8))
    ));

    backend.set_level_with_edge(DIP_PINS[0], false).unwrap();
    device.poll_and_dispatch().unwrap();
    assert!(seen.lock().is_empty());

    backend.set_level_with_edge(DIP_PINS[2], false).unwrap();
    device.poll_and_dispatch().unwrap();
    assert_eq!(*seen.lock(), vec![0b1111_1010]);
}

#[test]
fn listener_removed_mid_dispatch_is_skipped() {
    let backend = Arc::new(MockGpioBackend::default());
    let device = Arc::new(Pidee::new(DeviceConfig::default(), backend.clone()).unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let victim: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

    let (s, d, v) = (seen.clone(), device.clone(), victim.clone());
    device.add_button_listener(move |_| {
        s.lock().push("remover");
        if let Some(handle) = v.lock().take() {
            d.remove_listener(handle).unwrap();
        }
    });
    let s = seen.clone();
    let handle = device.add_button_listener(move |_| s.lock().push("victim"));
    *victim.lock() = Some(handle);

    backend.trigger_edge(BUTTON_PIN).unwrap();
    device.poll_and_dispatch().unwrap();
    backend.trigger_edge(BUTTON_PIN).unwrap();
    device.poll_and_dispatch().unwrap();

    assert_eq!(*seen.lock(), vec!["remover", "remover"]);
    assert!(matches!(
        device.remove_listener(handle),
        Err(PideeError::ListenerNotFound(_))
    ));
}

#[test]
fn panicking_listener_does_not_stop_dispatch() {
    let (backend, device) = default_device();
    let count = Arc::new(Mutex::new(0));

    device.add_button_listener(|_| panic!("listener failure"));
    let c = count.clone();
    device.add_button_listener(move |_| *c.lock() += 1);

    backend.trigger_edge(BUTTON_PIN).unwrap();
    device.poll_and_dispatch().unwrap();

    assert_eq!(*count.lock(), 1);
    assert_eq!(device.pending(), ChangeFlags::default());

    backend.trigger_edge(BUTTON_PIN).unwrap();
    device.poll_and_dispatch().unwrap();
    assert_eq!(*count.lock(), 2);
}

#[test]
fn disabled_events_register_no_interrupts() {
    let config = DeviceConfig {
        enable_events: false,
        ..DeviceConfig::default()
    };
    let (backend, device) = device_with(config);

    assert!(!device.events_enabled());
    assert!(!backend.has_interrupt(BUTTON_PIN));
    assert!(
        !backend
            .calls()
            .iter()
            .any(|c| matches!(c, GpioCall::Interrupt(..)))
    );

    backend.trigger_edge(BUTTON_PIN).unwrap();
    assert_eq!(device.poll_and_dispatch().unwrap(), ChangeFlags::default());
}

#[test]
fn failed_button_read_keeps_dip_change() {
    let (backend, device) = default_device();
    let buttons = Arc::new(Mutex::new(Vec::new()));
    let dips = Arc::new(Mutex::new(Vec::new()));

    let b = buttons.clone();
    device.add_button_listener(move |v| b.lock().push(v));
    let d = dips.clone();
    device.add_dip_listener(move |c| d.lock().push(c.value));

    backend.set_level_with_edge(BUTTON_PIN, false).unwrap();
    backend.set_level_with_edge(DIP_PINS[0], false).unwrap();
    backend.set_read_failure(BUTTON_PIN, true).unwrap();

    assert!(matches!(
        device.poll_and_dispatch(),
        Err(PideeError::Gpio(_))
    ));
    assert!(buttons.lock().is_empty());
    assert_eq!(*dips.lock(), vec![0xFE]);
    assert_eq!(
        device.pending(),
        ChangeFlags {
            button: true,
            dip: false
        }
    );

    backend.set_read_failure(BUTTON_PIN, false).unwrap();
    assert_eq!(
        device.poll_and_dispatch().unwrap(),
        ChangeFlags {
            button: true,
            dip: false
        }
    );
    assert_eq!(*buttons.lock(), vec![false]);
    assert_eq!(*dips.lock(), vec![0xFE]);
    assert_eq!(device.pending(), ChangeFlags::default());
}

#[test]
fn failed_dip_read_is_retried_on_next_poll() {
    let (backend, device) = default_device();
    let dips = Arc::new(Mutex::new(Vec::new()));

    let d = dips.clone();
    device.add_dip_listener(move |c| d.lock().push(*c));

    backend.set_level_with_edge(DIP_PINS[4], false).unwrap();
    backend.set_read_failure(DIP_PINS[7], true).unwrap();
    assert!(device.poll_and_dispatch().is_err());
    assert!(device.pending().dip);
    assert!(dips.lock().is_empty());

    backend.set_read_failure(DIP_PINS[7], false).unwrap();
    device.poll_and_dispatch().unwrap();
    assert_eq!(*dips.lock(), vec![DipChange::new(0xFF, 0xEF)]);
}

#[test]
fn edges_from_other_threads_coalesce_per_poll() {
    let backend = Arc::new(MockGpioBackend::default());
    let device = Arc::new(Pidee::new(DeviceConfig::default(), backend.clone()).unwrap());
    let button_dispatches = Arc::new(AtomicUsize::new(0));
    let dip_dispatches = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let c = button_dispatches.clone();
    device.add_button_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let c = dip_dispatches.clone();
    device.add_dip_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let edge_threads: Vec<_> = (0..4)
        .map(|i| {
            let (backend, stop) = (backend.clone(), stop.clone());
            thread::spawn(move || {
                loop {
                    backend.trigger_edge(BUTTON_PIN).unwrap();
                    backend.trigger_edge(DIP_PINS[i]).unwrap();
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
            })
        })
        .collect();

    let churn = {
        let (device, stop) = (device.clone(), stop.clone());
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let button = device.add_button_listener(|_| {});
                let dip = device.add_dip_listener(|_| {});
                device.remove_listener(button).unwrap();
                device.remove_listener(dip).unwrap();
            }
        })
    };

    let mut button_polls = 0;
    let mut dip_polls = 0;
    for _ in 0..200 {
        let drained = device.poll_and_dispatch().unwrap();
        button_polls += usize::from(drained.button);
        dip_polls += usize::from(drained.dip);
    }

    stop.store(true, Ordering::Relaxed);
    for t in edge_threads {
        t.join().unwrap();
    }
    churn.join().unwrap();

    let drained = device.poll_and_dispatch().unwrap();
    button_polls += usize::from(drained.button);
    dip_polls += usize::from(drained.dip);

    assert!(button_polls > 0 && dip_polls > 0);
    assert_eq!(button_dispatches.load(Ordering::SeqCst), button_polls);
    assert_eq!(dip_dispatches.load(Ordering::SeqCst), dip_polls);
    assert_eq!(device.pending(), ChangeFlags::default());
}

#[test]
fn inputs_sharing_an_interrupt_pin_are_rejected() {
    let mut config = DeviceConfig::default();
    config.pin_map.insert(
        "door".to_string(),
        FeatureOverride {
            feature_type: FeatureType::Button,
            physical: 11,
            bcm: DIP_PINS[0],
            logical: 0,
        },
    );
    let backend = Arc::new(MockGpioBackend::default());

    assert!(matches!(
        Pidee::new(config, backend),
        Err(PideeError::Config(msg)) if msg.contains("door")
    ));
}
