use uuid::Uuid;

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expands an assigned 16-bit attribute number into a full 128-bit UUID.
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Returns the assigned 16-bit number when `uuid` sits on the Bluetooth base UUID.
pub fn as_uuid16(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !(0xffff_u128 << 96) == BLUETOOTH_BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

// UART (Nordic UART compatible) service.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Central → peripheral data (write / write-without-response).
pub const UART_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Peripheral → central data (read / notify).
pub const UART_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

// Device Information service.
pub const DIS_SERVICE_UUID: Uuid = uuid16(0x180A);
pub const DIS_MANUFACTURER_NAME_UUID: Uuid = uuid16(0x2A29);
pub const DIS_MODEL_NUMBER_UUID: Uuid = uuid16(0x2A24);
pub const DIS_SERIAL_NUMBER_UUID: Uuid = uuid16(0x2A25);
pub const DIS_HARDWARE_REVISION_UUID: Uuid = uuid16(0x2A27);
pub const DIS_FIRMWARE_REVISION_UUID: Uuid = uuid16(0x2A26);
pub const DIS_SOFTWARE_REVISION_UUID: Uuid = uuid16(0x2A28);
