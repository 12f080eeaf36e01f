//! Modbus protocol constants
//!
//! Quantity limits match the Modbus application protocol v1.1b3, the same
//! values libmodbus enforces on the server side.

/// MBAP header: transaction id, protocol id, length, unit id
pub const MBAP_HEADER_LEN: usize = 7;

/// Bytes of the MBAP header that precede the length-counted part
pub const MBAP_PREFIX_LEN: usize = 6;

pub const MAX_PDU_SIZE: usize = 253;

pub const MAX_ADU_SIZE: usize = MBAP_PREFIX_LEN + 1 + MAX_PDU_SIZE;

/// Smallest legal MBAP length field: unit id plus function code
pub const MIN_MBAP_LENGTH: u16 = 2;

pub const MAX_MBAP_LENGTH: u16 = (1 + MAX_PDU_SIZE) as u16;

pub const MODBUS_PROTOCOL_ID: u16 = 0;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_WRITE_BITS: u16 = 1968;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_REGISTERS: u16 = 123;
pub const MAX_WR_WRITE_REGISTERS: u16 = 121;
pub const MAX_WR_READ_REGISTERS: u16 = 125;

/// One bank can hold at most the whole 16-bit address space
pub const MAX_BANK_SIZE: usize = 1 << 16;

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// Server id byte returned by report server id
pub const SERVER_ID: u8 = 0xB4;
pub const RUN_INDICATOR_ON: u8 = 0xFF;

pub const EXCEPTION_FLAG: u8 = 0x80;

pub const DEFAULT_PORT: u16 = 502;
