//! The C-convention layer: integer codes, value slots, caller buffers.
//!
//! These tests are plain `#[test]`s because every compat call blocks on the
//! layer's own runtime.

use amc100::compat::{read_c_string, write_c_string};
use amc100::simulator::presets;
use amc100::{
    ActorParameters, Amc100, CompatApi, NcbCode, SimulatedDevice, SimulatedTransport,
    SimulatorServer, TcpTransport,
};

const OK: i32 = 0;
const ADDRESS: &str = "192.168.1.1";

fn open() -> (CompatApi, i32) {
    let api = CompatApi::new(Amc100::new(SimulatedTransport::single(ADDRESS, "CMP-1"))).unwrap();
    let mut handle = -1;
    assert_eq!(api.connect(ADDRESS, &mut handle), OK);
    (api, handle)
}

// =============================================================================
// Codes and sessions
// =============================================================================

#[test]
fn test_connect_failure_leaves_handle_untouched() {
    let api = CompatApi::new(Amc100::new(SimulatedTransport::single(ADDRESS, "CMP-1"))).unwrap();
    let mut handle = 1234;
    assert_eq!(api.connect("10.1.1.1", &mut handle), NcbCode::NoDeviceFound.as_i32());
    assert_eq!(handle, 1234);
}

#[test]
fn test_closed_handle_reports_not_connected() {
    let (api, h) = open();
    assert_eq!(api.close(h), OK);

    let mut amplitude = 0;
    assert_eq!(api.control_amplitude(h, 0, &mut amplitude, false), -2);
    assert_eq!(api.close(h), -2);
    assert_eq!(api.control_amplitude(h + 50, 0, &mut amplitude, false), -2);
}

#[test]
fn test_unknown_handle_wins_over_bad_axis() {
    let (api, h) = open();
    let never = h + 50;

    let mut amplitude = 0;
    assert_eq!(api.control_amplitude(never, -1, &mut amplitude, false), -2);
    assert_eq!(api.set_reset(never, -1), -2);
    let mut buffer = [0u8; 16];
    assert_eq!(api.get_actor_name(never, -1, &mut buffer), -2);

    // A live handle still reports the bad axis
    assert_eq!(
        api.control_amplitude(h, -1, &mut amplitude, false),
        NcbCode::InvalidParam.as_i32()
    );
}

// =============================================================================
// Value slots
// =============================================================================

#[test]
fn test_control_writes_back_accepted_value() {
    let (api, h) = open();

    let mut amplitude = 45_000;
    assert_eq!(api.control_amplitude(h, 0, &mut amplitude, true), OK);
    assert_eq!(amplitude, 45_000);

    amplitude = 75_000;
    assert_eq!(api.control_amplitude(h, 0, &mut amplitude, true), OK);
    assert_eq!(amplitude, 60_000);

    let mut read_back = 0;
    assert_eq!(api.control_amplitude(h, 0, &mut read_back, false), OK);
    assert_eq!(read_back, 60_000);
}

#[test]
fn test_failed_call_leaves_slot_untouched() {
    let (api, h) = open();

    let mut amplitude = 777;
    assert_eq!(
        api.control_amplitude(h, 9, &mut amplitude, false),
        NcbCode::InvalidParam.as_i32()
    );
    assert_eq!(amplitude, 777);

    assert_eq!(
        api.control_amplitude(h, -1, &mut amplitude, false),
        NcbCode::InvalidParam.as_i32()
    );
    assert_eq!(amplitude, 777);

    // Real-time input is off by default
    let mut steps = 42;
    assert_eq!(
        api.control_realtime_input_steps_per_pulse(h, 0, &mut steps, false),
        NcbCode::InvalidParam.as_i32()
    );
    assert_eq!(steps, 42);
}

#[test]
fn test_motion_through_slots() {
    let (api, h) = open();

    let mut enable = true;
    assert_eq!(api.control_output(h, 0, &mut enable, true), OK);
    assert_eq!(api.set_n_steps(h, 0, false, 4), OK);

    let mut n = 0;
    assert_eq!(api.get_n_steps(h, 0, &mut n), OK);
    assert_eq!(n, 4);

    let mut position = 0;
    assert_eq!(api.get_position(h, 0, &mut position), OK);
    assert_eq!(position, 200);

    assert_eq!(api.set_reset(h, 0), OK);
    assert_eq!(api.get_position(h, 0, &mut position), OK);
    assert_eq!(position, 0);

    let mut moving = -1;
    assert_eq!(api.get_status_moving(h, 0, &mut moving), OK);
    assert_eq!(moving, 0);
}

// =============================================================================
// String buffers
// =============================================================================

#[test]
fn test_string_buffers() {
    let (api, h) = open();

    let mut buffer = [0u8; 64];
    assert_eq!(api.get_serial_number(h, &mut buffer), OK);
    assert_eq!(read_c_string(&buffer), Some("CMP-1"));

    // Exactly big enough, twice in a row
    let mut exact = [0xFFu8; 6];
    assert_eq!(api.get_serial_number(h, &mut exact), OK);
    assert_eq!(&exact, b"CMP-1\0");
    assert_eq!(api.get_serial_number(h, &mut exact), OK);
    assert_eq!(&exact, b"CMP-1\0");

    // One byte short: rejected, buffer untouched
    let mut short = [0xFFu8; 5];
    assert_eq!(api.get_serial_number(h, &mut short), NcbCode::InvalidParam.as_i32());
    assert_eq!(short, [0xFF; 5]);

    let mut list = [0u8; 256];
    assert_eq!(api.get_positioners_list(h, &mut list), OK);
    let list = read_c_string(&list).unwrap();
    assert!(list.lines().count() > 1);

    let mut text = [0u8; 64];
    assert_eq!(api.error_number_to_string(h, 1, -2, &mut text), OK);
    assert_eq!(read_c_string(&text), Some("Keine aktive Verbindung zum Gerät"));

    assert_eq!(write_c_string("", &mut [0u8; 1]), OK);
}

// =============================================================================
// Actors and access
// =============================================================================

#[test]
fn test_actor_parameters_struct() {
    let (api, h) = open();

    let mut params: ActorParameters = presets::by_index(8).unwrap();
    assert_eq!(api.get_actor_parameters(h, 1, &mut params), OK);
    assert_eq!(params.name, "ANPx101");

    params.name = "custom".into();
    params.stepsize = 80;
    assert_eq!(api.set_actor_parameters(h, 1, &params), OK);

    let mut buffer = [0u8; 16];
    assert_eq!(api.get_actor_name(h, 1, &mut buffer), OK);
    assert_eq!(read_c_string(&buffer), Some("custom"));
    assert_eq!(api.get_actor_parameters_by_param_name(h, 1, "stepsize", &mut buffer), OK);
    assert_eq!(read_c_string(&buffer), Some("80"));

    assert_eq!(api.set_actor_parameters_by_param_name_boolean(h, 1, "actor_dir", true), OK);
    assert_eq!(
        api.set_actor_parameters_by_param_name_boolean(h, 1, "fmax", true),
        NcbCode::InvalidParam.as_i32()
    );
}

#[test]
fn test_lock_status_and_access() {
    let (api, owner) = open();
    let mut other = -1;
    assert_eq!(api.connect(ADDRESS, &mut other), OK);

    assert_eq!(api.lock(owner, "pw"), OK);

    let (mut locked, mut authorized) = (false, true);
    assert_eq!(api.get_lock_status(other, &mut locked, &mut authorized), OK);
    assert!(locked);
    assert!(!authorized);

    let mut id = 0;
    let denied = api.control_device_id(other, &mut id, false);
    assert_eq!(denied, NcbCode::Error.as_i32());
    assert_ne!(denied, NcbCode::NotConnected.as_i32());

    assert_eq!(api.grant_access(other, "pw"), OK);
    assert_eq!(api.control_device_id(other, &mut id, false), OK);
}

// =============================================================================
// Over TCP
// =============================================================================

#[test]
fn test_compat_over_tcp() {
    let api = CompatApi::new(Amc100::new(TcpTransport::new())).unwrap();
    let runtime = api.runtime();

    let server = runtime
        .block_on(SimulatorServer::bind(
            "127.0.0.1:0",
            SimulatedDevice::new("CMP-TCP"),
        ))
        .unwrap();
    let address = server.local_addr().unwrap().to_string();
    runtime.spawn(server.run());

    let mut h = -1;
    assert_eq!(api.connect(&address, &mut h), OK);

    let mut frequency = 3_000_000;
    assert_eq!(api.control_frequency(h, 2, &mut frequency, true), OK);
    assert_eq!(frequency, 3_000_000);

    let mut buffer = [0u8; 32];
    assert_eq!(api.get_device_type(h, &mut buffer), OK);
    assert_eq!(read_c_string(&buffer), Some("AMC100"));

    assert_eq!(api.close(h), OK);
}
