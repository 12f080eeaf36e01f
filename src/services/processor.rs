use bytes::BytesMut;
use log::{debug, warn};
use std::sync::Arc;

use crate::modbus::constants::{RUN_INDICATOR_ON, SERVER_ID};
use crate::modbus::{ExceptionCode, Request, RequestFrame, Response, ResponseFrame};
use crate::registers::{BitBank, RegisterBank, RegisterMap};

/// Turns one request frame into exactly one response frame.
///
/// Decode failures and register map failures become exception responses;
/// nothing is propagated to the caller.
#[derive(Clone)]
pub struct RequestProcessor {
    map: Arc<RegisterMap>,
    identification: Vec<u8>,
}

impl RequestProcessor {
    pub fn new(map: Arc<RegisterMap>) -> Self {
        let identification =
            format!("{} {}", env!("CARGO_PKG_NAME"), crate::VERSION).into_bytes();
        Self {
            map,
            identification,
        }
    }

    pub fn register_map(&self) -> &Arc<RegisterMap> {
        &self.map
    }

    pub fn process(&self, frame: &RequestFrame) -> ResponseFrame {
        let response = self.handle_pdu(&frame.pdu);
        let mut pdu = BytesMut::with_capacity(8);
        response.encode(&mut pdu);
        ResponseFrame {
            header: frame.header,
            pdu: pdu.freeze(),
        }
    }

    pub fn handle_pdu(&self, pdu: &[u8]) -> Response {
        let function = pdu.first().copied().unwrap_or_default();
        let result = Request::parse(pdu).and_then(|request| {
            debug!("Modbus request: {:?}", request);
            self.execute(request)
        });

        match result {
            Ok(response) => response,
            Err(code) => {
                warn!("⚠️  Exception {} for function 0x{:02X}", code, function);
                Response::Exception { function, code }
            }
        }
    }

    fn execute(&self, request: Request) -> Result<Response, ExceptionCode> {
        let map = &self.map;
        let response = match request {
            Request::ReadCoils { address, quantity } => {
                Response::ReadCoils(map.read_bits(BitBank::Coils, address, quantity)?)
            }
            Request::ReadDiscreteInputs { address, quantity } => Response::ReadDiscreteInputs(
                map.read_bits(BitBank::DiscreteInputs, address, quantity)?,
            ),
            Request::ReadHoldingRegisters { address, quantity } => Response::ReadHoldingRegisters(
                map.read_registers(RegisterBank::Holding, address, quantity)?,
            ),
            Request::ReadInputRegisters { address, quantity } => Response::ReadInputRegisters(
                map.read_registers(RegisterBank::Input, address, quantity)?,
            ),
            Request::WriteSingleCoil { address, value } => {
                map.write_bits(BitBank::Coils, address, &[value])?;
                Response::WriteSingleCoil { address, value }
            }
            Request::WriteSingleRegister { address, value } => {
                map.write_registers(RegisterBank::Holding, address, &[value])?;
                Response::WriteSingleRegister { address, value }
            }
            Request::WriteMultipleCoils { address, values } => {
                map.write_bits(BitBank::Coils, address, &values)?;
                Response::WriteMultipleCoils {
                    address,
                    quantity: values.len() as u16,
                }
            }
            Request::WriteMultipleRegisters { address, values } => {
                map.write_registers(RegisterBank::Holding, address, &values)?;
                Response::WriteMultipleRegisters {
                    address,
                    quantity: values.len() as u16,
                }
            }
            Request::ReportServerId => Response::ReportServerId {
                server_id: SERVER_ID,
                run_indicator: RUN_INDICATOR_ON,
                identification: self.identification.clone(),
            },
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                map.mask_write_register(address, and_mask, or_mask)?;
                Response::MaskWriteRegister {
                    address,
                    and_mask,
                    or_mask,
                }
            }
            Request::ReadWriteMultipleRegisters {
                read_address,
                read_quantity,
                write_address,
                values,
            } => Response::ReadWriteMultipleRegisters(map.write_read_registers(
                write_address,
                &values,
                read_address,
                read_quantity,
            )?),
        };
        Ok(response)
    }
}
