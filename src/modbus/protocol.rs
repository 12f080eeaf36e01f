//! Modbus PDU model: request decoding and response encoding.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use super::constants::{COIL_OFF, COIL_ON, EXCEPTION_FLAG};
use crate::registers::RegisterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    ReportServerId,
    MaskWriteRegister,
    ReadWriteMultipleRegisters,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportServerId,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            _ => return None,
        })
    }

    pub fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportServerId => 0x11,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::ReportServerId => "Report Server ID",
            Self::MaskWriteRegister => "Mask Write Register",
            Self::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
}

impl ExceptionCode {
    pub fn value(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
        };
        write!(f, "{} (0x{:02X})", name, self.value())
    }
}

impl From<RegisterError> for ExceptionCode {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::OutOfRange { .. } | RegisterError::ReadOnly(_) => {
                Self::IllegalDataAddress
            }
            RegisterError::InvalidQuantity { .. } => Self::IllegalDataValue,
            RegisterError::Poisoned(_) => Self::ServerDeviceFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
    ReportServerId,
    MaskWriteRegister { address: u16, and_mask: u16, or_mask: u16 },
    ReadWriteMultipleRegisters {
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: Vec<u16>,
    },
}

impl Request {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            Self::ReportServerId => FunctionCode::ReportServerId,
            Self::MaskWriteRegister { .. } => FunctionCode::MaskWriteRegister,
            Self::ReadWriteMultipleRegisters { .. } => FunctionCode::ReadWriteMultipleRegisters,
        }
    }

    /// Decode a request PDU (function code first).
    ///
    /// Unknown function codes map to `IllegalFunction`; a known function
    /// with a malformed body maps to `IllegalDataValue`. Quantity limits are
    /// left to the register map.
    pub fn parse(pdu: &[u8]) -> Result<Self, ExceptionCode> {
        let (&code, body) = pdu.split_first().ok_or(ExceptionCode::IllegalFunction)?;
        let function = FunctionCode::from_u8(code).ok_or(ExceptionCode::IllegalFunction)?;
        let mut body = body;

        let request = match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                expect_len(body, 4)?;
                let address = body.get_u16();
                let quantity = body.get_u16();
                match function {
                    FunctionCode::ReadCoils => Self::ReadCoils { address, quantity },
                    FunctionCode::ReadDiscreteInputs => Self::ReadDiscreteInputs { address, quantity },
                    FunctionCode::ReadHoldingRegisters => {
                        Self::ReadHoldingRegisters { address, quantity }
                    }
                    _ => Self::ReadInputRegisters { address, quantity },
                }
            }
            FunctionCode::WriteSingleCoil => {
                expect_len(body, 4)?;
                let address = body.get_u16();
                let value = match body.get_u16() {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ExceptionCode::IllegalDataValue),
                };
                Self::WriteSingleCoil { address, value }
            }
            FunctionCode::WriteSingleRegister => {
                expect_len(body, 4)?;
                Self::WriteSingleRegister {
                    address: body.get_u16(),
                    value: body.get_u16(),
                }
            }
            FunctionCode::WriteMultipleCoils => {
                expect_min_len(body, 5)?;
                let address = body.get_u16();
                let quantity = body.get_u16();
                let byte_count = body.get_u8() as usize;
                if byte_count != (quantity as usize).div_ceil(8) || body.len() != byte_count {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Self::WriteMultipleCoils {
                    address,
                    values: unpack_bits(body, quantity as usize),
                }
            }
            FunctionCode::WriteMultipleRegisters => {
                expect_min_len(body, 5)?;
                let address = body.get_u16();
                let quantity = body.get_u16();
                let byte_count = body.get_u8() as usize;
                if byte_count != quantity as usize * 2 || body.len() != byte_count {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Self::WriteMultipleRegisters {
                    address,
                    values: unpack_words(body),
                }
            }
            FunctionCode::ReportServerId => {
                expect_len(body, 0)?;
                Self::ReportServerId
            }
            FunctionCode::MaskWriteRegister => {
                expect_len(body, 6)?;
                Self::MaskWriteRegister {
                    address: body.get_u16(),
                    and_mask: body.get_u16(),
                    or_mask: body.get_u16(),
                }
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                expect_min_len(body, 9)?;
                let read_address = body.get_u16();
                let read_quantity = body.get_u16();
                let write_address = body.get_u16();
                let write_quantity = body.get_u16();
                let byte_count = body.get_u8() as usize;
                if byte_count != write_quantity as usize * 2 || body.len() != byte_count {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Self::ReadWriteMultipleRegisters {
                    read_address,
                    read_quantity,
                    write_address,
                    values: unpack_words(body),
                }
            }
        };

        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    ReportServerId {
        server_id: u8,
        run_indicator: u8,
        identification: Vec<u8>,
    },
    MaskWriteRegister { address: u16, and_mask: u16, or_mask: u16 },
    ReadWriteMultipleRegisters(Vec<u16>),
    /// Echoes the request's function code with the high bit set
    Exception { function: u8, code: ExceptionCode },
}

impl Response {
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// Append the response PDU to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::ReadCoils(bits) => put_bits(buf, FunctionCode::ReadCoils, bits),
            Self::ReadDiscreteInputs(bits) => put_bits(buf, FunctionCode::ReadDiscreteInputs, bits),
            Self::ReadHoldingRegisters(words) => {
                put_words(buf, FunctionCode::ReadHoldingRegisters, words)
            }
            Self::ReadInputRegisters(words) => put_words(buf, FunctionCode::ReadInputRegisters, words),
            Self::ReadWriteMultipleRegisters(words) => {
                put_words(buf, FunctionCode::ReadWriteMultipleRegisters, words)
            }
            Self::WriteSingleCoil { address, value } => {
                buf.put_u8(FunctionCode::WriteSingleCoil.value());
                buf.put_u16(*address);
                buf.put_u16(if *value { COIL_ON } else { COIL_OFF });
            }
            Self::WriteSingleRegister { address, value } => {
                buf.put_u8(FunctionCode::WriteSingleRegister.value());
                buf.put_u16(*address);
                buf.put_u16(*value);
            }
            Self::WriteMultipleCoils { address, quantity } => {
                buf.put_u8(FunctionCode::WriteMultipleCoils.value());
                buf.put_u16(*address);
                buf.put_u16(*quantity);
            }
            Self::WriteMultipleRegisters { address, quantity } => {
                buf.put_u8(FunctionCode::WriteMultipleRegisters.value());
                buf.put_u16(*address);
                buf.put_u16(*quantity);
            }
            Self::ReportServerId {
                server_id,
                run_indicator,
                identification,
            } => {
                buf.put_u8(FunctionCode::ReportServerId.value());
                buf.put_u8((identification.len() + 2) as u8);
                buf.put_u8(*server_id);
                buf.put_u8(*run_indicator);
                buf.put_slice(identification);
            }
            Self::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                buf.put_u8(FunctionCode::MaskWriteRegister.value());
                buf.put_u16(*address);
                buf.put_u16(*and_mask);
                buf.put_u16(*or_mask);
            }
            Self::Exception { function, code } => {
                buf.put_u8(function | EXCEPTION_FLAG);
                buf.put_u8(code.value());
            }
        }
    }
}

fn expect_len(body: &[u8], len: usize) -> Result<(), ExceptionCode> {
    if body.len() != len {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn expect_min_len(body: &[u8], len: usize) -> Result<(), ExceptionCode> {
    if body.len() < len {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

/// Bits are packed LSB first, the first coil in bit 0 of the first byte
fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

fn unpack_words(mut bytes: &[u8]) -> Vec<u16> {
    let mut words = Vec::with_capacity(bytes.len() / 2);
    while bytes.remaining() >= 2 {
        words.push(bytes.get_u16());
    }
    words
}

fn put_bits(buf: &mut BytesMut, function: FunctionCode, bits: &[bool]) {
    buf.put_u8(function.value());
    buf.put_u8(bits.len().div_ceil(8) as u8);
    for chunk in bits.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, bit)| if *bit { acc | (1 << i) } else { acc });
        buf.put_u8(byte);
    }
}

fn put_words(buf: &mut BytesMut, function: FunctionCode, words: &[u16]) {
    buf.put_u8(function.value());
    buf.put_u8((words.len() * 2) as u8);
    for word in words {
        buf.put_u16(*word);
    }
}
