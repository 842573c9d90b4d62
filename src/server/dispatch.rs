// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatching decoded requests against a data store

use std::{
    future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    frame::*,
    store::{CounterEvent, DataStore},
};

use super::{DeviceIdentification, Service};

// fn code + MEI header bytes of a device-identification response.
const DEVICE_ID_HEADER_LEN: usize = 7;

// fn code + byte count of a file-record response.
const FILE_RECORD_OVERHEAD: usize = 2;

#[derive(Debug)]
struct Shared {
    listen_only: AtomicBool,
    device_id: DeviceIdentification,
    server_id: ServerId,
}

/// A [`Service`] that implements all standard function codes on top of
/// a [`DataStore`].
///
/// Clones share the data store, the device-identification record and
/// the listen-only state, so one instance per connection is cheap.
#[derive(Debug)]
pub struct StoreService<D> {
    store: Arc<D>,
    shared: Arc<Shared>,
}

impl<D> Clone for StoreService<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D> StoreService<D>
where
    D: DataStore,
{
    /// A service around the given data store with the default
    /// device-identification record.
    #[must_use]
    pub fn new(store: Arc<D>) -> Self {
        Self {
            store,
            shared: Arc::new(Shared {
                listen_only: AtomicBool::new(false),
                device_id: DeviceIdentification::default(),
                server_id: ServerId {
                    server_id: 0x01,
                    run_indicator: true,
                    additional_data: env!("CARGO_PKG_NAME").as_bytes().to_vec(),
                },
            }),
        }
    }

    /// Replace the device-identification record.
    #[must_use]
    pub fn device_identification(self, device_id: DeviceIdentification) -> Self {
        let shared = Shared {
            device_id,
            ..clone_shared(&self.shared)
        };
        Self {
            store: self.store,
            shared: Arc::new(shared),
        }
    }

    /// Replace the report-server-id payload.
    #[must_use]
    pub fn server_id(self, server_id: ServerId) -> Self {
        let shared = Shared {
            server_id,
            ..clone_shared(&self.shared)
        };
        Self {
            store: self.store,
            shared: Arc::new(shared),
        }
    }

    /// The wrapped data store.
    #[must_use]
    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    fn handle(&self, req: SlaveRequest<'static>) -> Result<Option<Response>, ExceptionCode> {
        let SlaveRequest { slave, request } = req;
        let is_broadcast = slave == 0;
        self.store.record(CounterEvent::BusMessage);
        self.store.record(CounterEvent::ServerMessage);

        // In listen-only mode the server monitors the bus without
        // acting until communications are restarted.
        if self.shared.listen_only.load(Ordering::Acquire) {
            if let Request::Diagnostics(
                DiagnosticSubFunction::RestartCommunicationsOption,
                data,
            ) = request
            {
                self.shared.listen_only.store(false, Ordering::Release);
                let value = self
                    .store
                    .diagnostics(DiagnosticSubFunction::RestartCommunicationsOption, data)?;
                let rsp = Response::Diagnostics(
                    DiagnosticSubFunction::RestartCommunicationsOption,
                    value,
                );
                return Ok((!is_broadcast).then_some(rsp));
            }
            self.store.record(CounterEvent::ServerNoResponse);
            return Ok(None);
        }

        let result = self.dispatch(request);
        if let Err(exception) = &result {
            self.store.record(CounterEvent::BusException);
            if *exception == ExceptionCode::ServerDeviceBusy {
                self.store.record(CounterEvent::ServerBusy);
            }
        }
        if is_broadcast {
            // The operation has been performed, but broadcasts are
            // never answered, not even with an exception.
            self.store.record(CounterEvent::ServerNoResponse);
            if let Err(exception) = result {
                log::debug!("Suppressing exception for broadcast request: {exception}");
            }
            return Ok(None);
        }
        result
    }

    fn dispatch(&self, request: Request<'static>) -> Result<Option<Response>, ExceptionCode> {
        use Request::*;

        let store = self.store.as_ref();
        let rsp = match request {
            ReadCoils(addr, cnt) => Response::ReadCoils(store.read_coils(addr, cnt)?),
            ReadDiscreteInputs(addr, cnt) => {
                Response::ReadDiscreteInputs(store.read_discrete_inputs(addr, cnt)?)
            }
            ReadHoldingRegisters(addr, cnt) => {
                Response::ReadHoldingRegisters(store.read_holding_registers(addr, cnt)?)
            }
            ReadInputRegisters(addr, cnt) => {
                Response::ReadInputRegisters(store.read_input_registers(addr, cnt)?)
            }
            WriteSingleCoil(addr, coil) => {
                store.write_coils(addr, &[coil])?;
                Response::WriteSingleCoil(addr, coil)
            }
            WriteSingleRegister(addr, word) => {
                store.write_holding_registers(addr, &[word])?;
                Response::WriteSingleRegister(addr, word)
            }
            WriteMultipleCoils(addr, coils) => {
                store.write_coils(addr, &coils)?;
                let quantity = coils.len() as Quantity;
                Response::WriteMultipleCoils(addr, quantity)
            }
            WriteMultipleRegisters(addr, words) => {
                store.write_holding_registers(addr, &words)?;
                let quantity = words.len() as Quantity;
                Response::WriteMultipleRegisters(addr, quantity)
            }
            MaskWriteRegister(addr, and_mask, or_mask) => {
                store.mask_write_register(addr, and_mask, or_mask)?;
                Response::MaskWriteRegister(addr, and_mask, or_mask)
            }
            ReadWriteMultipleRegisters(read_addr, cnt, write_addr, words) => {
                Response::ReadWriteMultipleRegisters(
                    store.read_write_registers(read_addr, cnt, write_addr, &words)?,
                )
            }
            ReadExceptionStatus => Response::ReadExceptionStatus(store.read_exception_status()?),
            Diagnostics(sub_function, data) => {
                return self.diagnostics(sub_function, data);
            }
            GetCommEventCounter => {
                let (status, event_count) = store.comm_event_counter()?;
                Response::GetCommEventCounter(status, event_count)
            }
            GetCommEventLog => Response::GetCommEventLog(store.comm_event_log()?),
            ReportServerId => Response::ReportServerId(self.shared.server_id.clone()),
            ReadFileRecord(refs) => {
                let mut payload = FILE_RECORD_OVERHEAD;
                let mut record_data = Vec::with_capacity(refs.len());
                for r in refs.iter() {
                    payload += 2 + usize::from(r.record_length) * 2;
                    if payload > MAX_PDU_SIZE {
                        return Err(ExceptionCode::IllegalDataValue);
                    }
                    record_data.push(store.read_file_record(
                        r.file_number,
                        r.record_number,
                        r.record_length,
                    )?);
                }
                Response::ReadFileRecord(record_data)
            }
            WriteFileRecord(records) => {
                for r in records.iter() {
                    store.write_file_record(r.file_number, r.record_number, &r.data)?;
                }
                Response::WriteFileRecord(records.into_owned())
            }
            ReadFifoQueue(addr) => {
                let values = store.read_fifo_queue(addr)?;
                if values.len() > usize::from(limits::MAX_FIFO_COUNT) {
                    return Err(ExceptionCode::ServerDeviceFailure);
                }
                Response::ReadFifoQueue(values)
            }
            ReadDeviceIdentification(code, object_id) => {
                self.read_device_identification(code, object_id)?
            }
            Custom(_, _) => return Err(ExceptionCode::IllegalFunction),
        };
        Ok(Some(rsp))
    }

    fn diagnostics(
        &self,
        sub_function: DiagnosticSubFunction,
        data: u16,
    ) -> Result<Option<Response>, ExceptionCode> {
        use DiagnosticSubFunction::*;

        match sub_function {
            ReturnQueryData => Ok(Some(Response::Diagnostics(sub_function, data))),
            ForceListenOnlyMode => {
                self.shared.listen_only.store(true, Ordering::Release);
                Ok(None)
            }
            RestartCommunicationsOption => {
                self.shared.listen_only.store(false, Ordering::Release);
                let value = self.store.diagnostics(sub_function, data)?;
                Ok(Some(Response::Diagnostics(sub_function, value)))
            }
            _ => {
                let value = self.store.diagnostics(sub_function, data)?;
                Ok(Some(Response::Diagnostics(sub_function, value)))
            }
        }
    }

    fn read_device_identification(
        &self,
        code: ReadDeviceIdCode,
        start_object_id: u8,
    ) -> Result<Response, ExceptionCode> {
        let device_id = &self.shared.device_id;
        let conformity_level = device_id.conformity_level;

        if code == ReadDeviceIdCode::Specific {
            let Some(data) = device_id.objects.get(&start_object_id) else {
                return Err(ExceptionCode::IllegalDataAddress);
            };
            return Ok(Response::ReadDeviceIdentification(DeviceIdResponse {
                read_device_id_code: code,
                conformity_level,
                more_follows: false,
                next_object_id: 0,
                objects: vec![DeviceIdObject {
                    object_id: start_object_id,
                    data: data.clone(),
                }],
            }));
        }

        let max_object_id = match code {
            ReadDeviceIdCode::Basic => device_id_object::MAJOR_MINOR_REVISION,
            ReadDeviceIdCode::Regular => device_id_object::USER_APPLICATION_NAME,
            ReadDeviceIdCode::Extended | ReadDeviceIdCode::Specific => u8::MAX,
        };
        // An unknown start object restarts the stream at the first
        // object of the category.
        let start_object_id = if device_id
            .objects
            .range(start_object_id..=max_object_id)
            .next()
            .is_some()
        {
            start_object_id
        } else {
            0
        };

        let mut budget = MAX_PDU_SIZE - DEVICE_ID_HEADER_LEN;
        let mut more_follows = false;
        let mut next_object_id = 0;
        let mut objects = Vec::new();
        for (&object_id, data) in device_id.objects.range(start_object_id..=max_object_id) {
            if 2 + data.len() > budget {
                more_follows = true;
                next_object_id = object_id;
                break;
            }
            budget -= 2 + data.len();
            objects.push(DeviceIdObject {
                object_id,
                data: data.clone(),
            });
        }
        if objects.is_empty() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(Response::ReadDeviceIdentification(DeviceIdResponse {
            read_device_id_code: code,
            conformity_level,
            more_follows,
            next_object_id,
            objects,
        }))
    }
}

// Rebuilding the shared block is only needed while configuring the
// service, before any clone exists.
fn clone_shared(shared: &Shared) -> Shared {
    Shared {
        listen_only: AtomicBool::new(shared.listen_only.load(Ordering::Acquire)),
        device_id: shared.device_id.clone(),
        server_id: shared.server_id.clone(),
    }
}

impl<D> Service for StoreService<D>
where
    D: DataStore + 'static,
{
    type Future = future::Ready<Result<Option<Response>, ExceptionCode>>;

    fn call(&self, req: SlaveRequest<'static>) -> Self::Future {
        future::ready(self.handle(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::borrow::Cow;

    fn service() -> StoreService<InMemoryStore> {
        StoreService::new(Arc::new(InMemoryStore::with_capacity(64, 64, 128, 64)))
    }

    fn call(
        service: &StoreService<InMemoryStore>,
        slave: u8,
        request: Request<'static>,
    ) -> Result<Option<Response>, ExceptionCode> {
        service.handle(SlaveRequest { slave, request })
    }

    #[test]
    fn read_holding_registers() {
        let service = service();
        service
            .store()
            .write_holding_registers(0, &[0, 100, 200, 300, 400])
            .unwrap();
        let rsp = call(&service, 1, Request::ReadHoldingRegisters(0, 5))
            .unwrap()
            .unwrap();
        assert_eq!(
            rsp,
            Response::ReadHoldingRegisters(vec![0, 100, 200, 300, 400])
        );
    }

    #[test]
    fn write_single_coil_and_read_back() {
        let service = service();
        let rsp = call(&service, 1, Request::WriteSingleCoil(10, true))
            .unwrap()
            .unwrap();
        assert_eq!(rsp, Response::WriteSingleCoil(10, true));
        let rsp = call(&service, 1, Request::ReadCoils(10, 1)).unwrap().unwrap();
        assert_eq!(rsp, Response::ReadCoils(vec![true]));
    }

    #[test]
    fn mask_write_register_semantics() {
        let service = service();
        service
            .store()
            .write_holding_registers(40, &[0x0012])
            .unwrap();
        let rsp = call(&service, 1, Request::MaskWriteRegister(40, 0x00F2, 0x0025))
            .unwrap()
            .unwrap();
        assert_eq!(rsp, Response::MaskWriteRegister(40, 0x00F2, 0x0025));
        assert_eq!(
            service.store().read_holding_registers(40, 1).unwrap(),
            vec![0x0017]
        );
    }

    #[test]
    fn read_write_multiple_observes_write() {
        let service = service();
        let rsp = call(
            &service,
            1,
            Request::ReadWriteMultipleRegisters(0, 3, 1, Cow::Owned(vec![7, 8])),
        )
        .unwrap()
        .unwrap();
        assert_eq!(rsp, Response::ReadWriteMultipleRegisters(vec![0, 7, 8]));
    }

    #[test]
    fn illegal_address_passes_through() {
        let service = service();
        let err = call(&service, 1, Request::ReadHoldingRegisters(127, 2)).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn unknown_function_is_rejected() {
        let service = service();
        let err = call(&service, 1, Request::Custom(0x44, Cow::Owned(vec![]))).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }

    #[test]
    fn broadcast_performs_write_without_response() {
        let service = service();
        let rsp = call(
            &service,
            0,
            Request::WriteMultipleRegisters(100, Cow::Owned(vec![1, 2, 3])),
        )
        .unwrap();
        assert_eq!(rsp, None);
        assert_eq!(
            service.store().read_holding_registers(100, 3).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn broadcast_suppresses_exceptions() {
        let service = service();
        let rsp = call(&service, 0, Request::WriteSingleRegister(5000, 1)).unwrap();
        assert_eq!(rsp, None);
    }

    #[test]
    fn listen_only_mode() {
        let service = service();
        let rsp = call(
            &service,
            1,
            Request::Diagnostics(DiagnosticSubFunction::ForceListenOnlyMode, 0),
        )
        .unwrap();
        assert_eq!(rsp, None);

        // Monitoring only: no response, no action.
        let rsp = call(&service, 1, Request::WriteSingleRegister(3, 7)).unwrap();
        assert_eq!(rsp, None);
        assert_eq!(
            service.store().read_holding_registers(3, 1).unwrap(),
            vec![0]
        );

        // Restart communications leaves listen-only mode.
        let rsp = call(
            &service,
            1,
            Request::Diagnostics(DiagnosticSubFunction::RestartCommunicationsOption, 0),
        )
        .unwrap();
        assert!(rsp.is_some());
        let rsp = call(&service, 1, Request::WriteSingleRegister(3, 7)).unwrap();
        assert!(rsp.is_some());
    }

    #[test]
    fn return_query_data_echoes() {
        let service = service();
        let rsp = call(
            &service,
            1,
            Request::Diagnostics(DiagnosticSubFunction::ReturnQueryData, 0xA537),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            rsp,
            Response::Diagnostics(DiagnosticSubFunction::ReturnQueryData, 0xA537)
        );
    }

    #[test]
    fn file_record_roundtrip() {
        let service = service();
        let records = vec![FileRecord {
            file_number: 4,
            record_number: 7,
            data: vec![0x06AF, 0x04BE],
        }];
        let rsp = call(
            &service,
            1,
            Request::WriteFileRecord(Cow::Owned(records.clone())),
        )
        .unwrap()
        .unwrap();
        assert_eq!(rsp, Response::WriteFileRecord(records));
        let rsp = call(
            &service,
            1,
            Request::ReadFileRecord(Cow::Owned(vec![FileRecordRef {
                file_number: 4,
                record_number: 7,
                record_length: 2,
            }])),
        )
        .unwrap()
        .unwrap();
        assert_eq!(rsp, Response::ReadFileRecord(vec![vec![0x06AF, 0x04BE]]));
    }

    #[test]
    fn device_identification_stream_and_specific() {
        let service = service();
        let rsp = call(
            &service,
            1,
            Request::ReadDeviceIdentification(ReadDeviceIdCode::Basic, 0),
        )
        .unwrap()
        .unwrap();
        let Response::ReadDeviceIdentification(device_id) = rsp else {
            panic!("unexpected response");
        };
        assert_eq!(device_id.objects.len(), 3);
        assert!(!device_id.more_follows);

        let rsp = call(
            &service,
            1,
            Request::ReadDeviceIdentification(ReadDeviceIdCode::Specific, 0x00),
        )
        .unwrap()
        .unwrap();
        let Response::ReadDeviceIdentification(device_id) = rsp else {
            panic!("unexpected response");
        };
        assert_eq!(device_id.objects.len(), 1);
        assert_eq!(device_id.objects[0].data, b"slowtec GmbH");

        let err = call(
            &service,
            1,
            Request::ReadDeviceIdentification(ReadDeviceIdCode::Specific, 0x77),
        )
        .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn server_message_counter_increments() {
        let service = service();
        call(&service, 1, Request::ReadCoils(0, 1)).unwrap();
        call(&service, 1, Request::ReadCoils(0, 1)).unwrap();
        let rsp = call(
            &service,
            1,
            Request::Diagnostics(DiagnosticSubFunction::ReturnServerMessageCount, 0),
        )
        .unwrap()
        .unwrap();
        // Two reads plus the diagnostics request itself.
        assert_eq!(
            rsp,
            Response::Diagnostics(DiagnosticSubFunction::ReturnServerMessageCount, 3)
        );
    }
}
