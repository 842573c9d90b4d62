// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference in-memory data store

use std::{
    collections::HashMap,
    sync::RwLock,
};

use crate::frame::{
    limits::MAX_FIFO_COUNT, Address, Coil, CommEventLog, DiagnosticSubFunction, ExceptionCode,
    Quantity, Word,
};

use super::{CounterEvent, DataStore, StoreResult};

const MAX_EVENT_LOG_LEN: usize = 64;

// Bit-coded "receive" event byte of the communication event log.
const EVENT_RECEIVE: u8 = 0x80;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    bus_message: u16,
    bus_communication_error: u16,
    bus_exception: u16,
    server_message: u16,
    server_no_response: u16,
    server_nak: u16,
    server_busy: u16,
    bus_character_overrun: u16,
}

#[derive(Debug, Default)]
struct Diagnostics {
    register: u16,
    counters: Counters,
    comm_event_count: u16,
    event_log: Vec<u8>,
}

impl Diagnostics {
    fn clear_counters(&mut self) {
        self.counters = Counters::default();
        self.register = 0;
    }

    fn push_event(&mut self, event: u8) {
        // Newest event first, bounded length.
        self.event_log.insert(0, event);
        self.event_log.truncate(MAX_EVENT_LOG_LEN);
    }
}

/// A fixed-size, volatile data store guarded by one read-write lock
/// per logical region.
///
/// Concurrent readers proceed in parallel, writers are exclusive. The
/// compound register operations hold the holding-register lock for
/// their whole duration.
#[derive(Debug)]
pub struct InMemoryStore {
    coils: RwLock<Vec<Coil>>,
    discrete_inputs: RwLock<Vec<Coil>>,
    holding_registers: RwLock<Vec<Word>>,
    input_registers: RwLock<Vec<Word>>,
    file_records: RwLock<HashMap<u16, HashMap<u16, Vec<Word>>>>,
    fifo_queues: RwLock<HashMap<Address, Vec<Word>>>,
    exception_status: RwLock<u8>,
    diagnostics: RwLock<Diagnostics>,
}

impl Default for InMemoryStore {
    /// A store covering the full 16-bit address space of every region.
    fn default() -> Self {
        Self::with_capacity(0x1_0000, 0x1_0000, 0x1_0000, 0x1_0000)
    }
}

fn poisoned<T>() -> StoreResult<T> {
    // A poisoned lock means a writer panicked; the region content can
    // no longer be trusted.
    Err(ExceptionCode::ServerDeviceFailure)
}

fn check_range(len: usize, addr: Address, cnt: usize) -> StoreResult<()> {
    if usize::from(addr) + cnt > len {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

impl InMemoryStore {
    /// A store with the given number of addressable items per region.
    #[must_use]
    pub fn with_capacity(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coils]),
            discrete_inputs: RwLock::new(vec![false; discrete_inputs]),
            holding_registers: RwLock::new(vec![0; holding_registers]),
            input_registers: RwLock::new(vec![0; input_registers]),
            file_records: RwLock::new(HashMap::new()),
            fifo_queues: RwLock::new(HashMap::new()),
            exception_status: RwLock::new(0),
            diagnostics: RwLock::new(Diagnostics::default()),
        }
    }

    /// Overwrite a discrete input, e.g. to simulate a changing field
    /// signal.
    pub fn set_discrete_input(&self, addr: Address, value: Coil) -> StoreResult<()> {
        let Ok(mut inputs) = self.discrete_inputs.write() else {
            return poisoned();
        };
        check_range(inputs.len(), addr, 1)?;
        inputs[usize::from(addr)] = value;
        Ok(())
    }

    /// Overwrite an input register.
    pub fn set_input_register(&self, addr: Address, value: Word) -> StoreResult<()> {
        let Ok(mut registers) = self.input_registers.write() else {
            return poisoned();
        };
        check_range(registers.len(), addr, 1)?;
        registers[usize::from(addr)] = value;
        Ok(())
    }

    /// Overwrite the exception status byte.
    pub fn set_exception_status(&self, status: u8) -> StoreResult<()> {
        let Ok(mut exception_status) = self.exception_status.write() else {
            return poisoned();
        };
        *exception_status = status;
        Ok(())
    }

    /// Register or replace the FIFO queue at `addr`.
    ///
    /// Queues are bounded to 31 values.
    pub fn set_fifo_queue(&self, addr: Address, values: &[Word]) -> StoreResult<()> {
        if values.len() > usize::from(MAX_FIFO_COUNT) {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let Ok(mut queues) = self.fifo_queues.write() else {
            return poisoned();
        };
        queues.insert(addr, values.to_vec());
        Ok(())
    }

    /// Create or replace a file record.
    pub fn set_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        data: &[Word],
    ) -> StoreResult<()> {
        let Ok(mut files) = self.file_records.write() else {
            return poisoned();
        };
        files
            .entry(file_number)
            .or_default()
            .insert(record_number, data.to_vec());
        Ok(())
    }
}

impl DataStore for InMemoryStore {
    fn read_coils(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>> {
        let Ok(coils) = self.coils.read() else {
            return poisoned();
        };
        check_range(coils.len(), addr, cnt.into())?;
        Ok(coils[addr.into()..usize::from(addr) + usize::from(cnt)].to_vec())
    }

    fn write_coils(&self, addr: Address, values: &[Coil]) -> StoreResult<()> {
        let Ok(mut coils) = self.coils.write() else {
            return poisoned();
        };
        check_range(coils.len(), addr, values.len())?;
        coils[addr.into()..usize::from(addr) + values.len()].copy_from_slice(values);
        Ok(())
    }

    fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>> {
        let Ok(inputs) = self.discrete_inputs.read() else {
            return poisoned();
        };
        check_range(inputs.len(), addr, cnt.into())?;
        Ok(inputs[addr.into()..usize::from(addr) + usize::from(cnt)].to_vec())
    }

    fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>> {
        let Ok(registers) = self.holding_registers.read() else {
            return poisoned();
        };
        check_range(registers.len(), addr, cnt.into())?;
        Ok(registers[addr.into()..usize::from(addr) + usize::from(cnt)].to_vec())
    }

    fn write_holding_registers(&self, addr: Address, words: &[Word]) -> StoreResult<()> {
        let Ok(mut registers) = self.holding_registers.write() else {
            return poisoned();
        };
        check_range(registers.len(), addr, words.len())?;
        registers[addr.into()..usize::from(addr) + words.len()].copy_from_slice(words);
        Ok(())
    }

    fn read_input_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>> {
        let Ok(registers) = self.input_registers.read() else {
            return poisoned();
        };
        check_range(registers.len(), addr, cnt.into())?;
        Ok(registers[addr.into()..usize::from(addr) + usize::from(cnt)].to_vec())
    }

    fn mask_write_register(
        &self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> StoreResult<Word> {
        // Read-modify-write under the exclusive write lock.
        let Ok(mut registers) = self.holding_registers.write() else {
            return poisoned();
        };
        check_range(registers.len(), addr, 1)?;
        let current = registers[usize::from(addr)];
        let new = (current & and_mask) | (or_mask & !and_mask);
        registers[usize::from(addr)] = new;
        Ok(new)
    }

    fn read_write_registers(
        &self,
        read_addr: Address,
        cnt: Quantity,
        write_addr: Address,
        words: &[Word],
    ) -> StoreResult<Vec<Word>> {
        // Write before read under one exclusive lock: an overlapping
        // read range observes the new values.
        let Ok(mut registers) = self.holding_registers.write() else {
            return poisoned();
        };
        check_range(registers.len(), write_addr, words.len())?;
        check_range(registers.len(), read_addr, cnt.into())?;
        registers[write_addr.into()..usize::from(write_addr) + words.len()]
            .copy_from_slice(words);
        Ok(registers[read_addr.into()..usize::from(read_addr) + usize::from(cnt)].to_vec())
    }

    fn read_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        record_length: u16,
    ) -> StoreResult<Vec<Word>> {
        let Ok(files) = self.file_records.read() else {
            return poisoned();
        };
        let record = files
            .get(&file_number)
            .and_then(|records| records.get(&record_number))
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if usize::from(record_length) > record.len() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(record[..record_length.into()].to_vec())
    }

    fn write_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        data: &[Word],
    ) -> StoreResult<()> {
        let Ok(mut files) = self.file_records.write() else {
            return poisoned();
        };
        files
            .entry(file_number)
            .or_default()
            .insert(record_number, data.to_vec());
        Ok(())
    }

    fn read_fifo_queue(&self, addr: Address) -> StoreResult<Vec<Word>> {
        let Ok(queues) = self.fifo_queues.read() else {
            return poisoned();
        };
        queues
            .get(&addr)
            .cloned()
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn read_exception_status(&self) -> StoreResult<u8> {
        let Ok(exception_status) = self.exception_status.read() else {
            return poisoned();
        };
        Ok(*exception_status)
    }

    fn diagnostics(&self, sub_function: DiagnosticSubFunction, data: u16) -> StoreResult<u16> {
        use DiagnosticSubFunction::*;

        let Ok(mut diagnostics) = self.diagnostics.write() else {
            return poisoned();
        };
        let value = match sub_function {
            ReturnQueryData | ForceListenOnlyMode => data,
            RestartCommunicationsOption => {
                if data != 0x0000 && data != 0xFF00 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                diagnostics.clear_counters();
                if data == 0xFF00 {
                    diagnostics.event_log.clear();
                }
                data
            }
            ReturnDiagnosticRegister => diagnostics.register,
            ClearCountersAndDiagnosticRegister => {
                diagnostics.clear_counters();
                data
            }
            ReturnBusMessageCount => diagnostics.counters.bus_message,
            ReturnBusCommunicationErrorCount => diagnostics.counters.bus_communication_error,
            ReturnBusExceptionErrorCount => diagnostics.counters.bus_exception,
            ReturnServerMessageCount => diagnostics.counters.server_message,
            ReturnServerNoResponseCount => diagnostics.counters.server_no_response,
            ReturnServerNakCount => diagnostics.counters.server_nak,
            ReturnServerBusyCount => diagnostics.counters.server_busy,
            ReturnBusCharacterOverrunCount => diagnostics.counters.bus_character_overrun,
            ClearOverrunCounter => {
                diagnostics.counters.bus_character_overrun = 0;
                data
            }
        };
        Ok(value)
    }

    fn comm_event_counter(&self) -> StoreResult<(u16, u16)> {
        let Ok(diagnostics) = self.diagnostics.read() else {
            return poisoned();
        };
        Ok((0x0000, diagnostics.comm_event_count))
    }

    fn comm_event_log(&self) -> StoreResult<CommEventLog> {
        let Ok(diagnostics) = self.diagnostics.read() else {
            return poisoned();
        };
        Ok(CommEventLog {
            status: 0x0000,
            event_count: diagnostics.comm_event_count,
            message_count: diagnostics.counters.bus_message,
            events: diagnostics.event_log.clone(),
        })
    }

    fn record(&self, event: CounterEvent) {
        let Ok(mut diagnostics) = self.diagnostics.write() else {
            return;
        };
        let counters = &mut diagnostics.counters;
        match event {
            CounterEvent::BusMessage => {
                counters.bus_message = counters.bus_message.wrapping_add(1);
            }
            CounterEvent::BusCommunicationError => {
                counters.bus_communication_error =
                    counters.bus_communication_error.wrapping_add(1);
            }
            CounterEvent::BusException => {
                counters.bus_exception = counters.bus_exception.wrapping_add(1);
            }
            CounterEvent::ServerMessage => {
                counters.server_message = counters.server_message.wrapping_add(1);
                diagnostics.comm_event_count = diagnostics.comm_event_count.wrapping_add(1);
                diagnostics.push_event(EVENT_RECEIVE);
            }
            CounterEvent::ServerNoResponse => {
                counters.server_no_response = counters.server_no_response.wrapping_add(1);
            }
            CounterEvent::ServerNak => {
                counters.server_nak = counters.server_nak.wrapping_add(1);
            }
            CounterEvent::ServerBusy => {
                counters.server_busy = counters.server_busy.wrapping_add(1);
            }
            CounterEvent::BusCharacterOverrun => {
                counters.bus_character_overrun = counters.bus_character_overrun.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store() -> InMemoryStore {
        InMemoryStore::with_capacity(16, 16, 128, 16)
    }

    #[test]
    fn coil_roundtrip() {
        let store = small_store();
        store.write_coils(10, &[true]).unwrap();
        assert_eq!(store.read_coils(10, 1).unwrap(), vec![true]);
        assert_eq!(store.read_coils(9, 3).unwrap(), vec![false, true, false]);
    }

    #[test]
    fn out_of_range_access() {
        let store = small_store();
        assert_eq!(
            store.read_coils(15, 2).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            store.write_holding_registers(127, &[1, 2]).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        assert!(store.read_holding_registers(127, 1).is_ok());
    }

    #[test]
    fn mask_write_semantics() {
        let store = small_store();
        store.write_holding_registers(40, &[0x0012]).unwrap();
        let new = store.mask_write_register(40, 0x00F2, 0x0025).unwrap();
        assert_eq!(new, 0x0017);
        assert_eq!(store.read_holding_registers(40, 1).unwrap(), vec![0x0017]);
    }

    #[test]
    fn read_write_registers_observes_new_values() {
        let store = small_store();
        store.write_holding_registers(0, &[1, 2, 3, 4]).unwrap();
        let read = store.read_write_registers(0, 4, 2, &[30, 40]).unwrap();
        assert_eq!(read, vec![1, 2, 30, 40]);
    }

    #[test]
    fn file_records() {
        let store = small_store();
        store.set_file_record(4, 7, &[0x06AF, 0x04BE]).unwrap();
        assert_eq!(
            store.read_file_record(4, 7, 2).unwrap(),
            vec![0x06AF, 0x04BE]
        );
        assert_eq!(
            store.read_file_record(4, 7, 3).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            store.read_file_record(4, 8, 1).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        store.write_file_record(4, 8, &[0xAFFE]).unwrap();
        assert_eq!(store.read_file_record(4, 8, 1).unwrap(), vec![0xAFFE]);
    }

    #[test]
    fn fifo_queue_is_bounded() {
        let store = small_store();
        let values: Vec<Word> = (0..31).collect();
        store.set_fifo_queue(0x04DE, &values).unwrap();
        assert_eq!(store.read_fifo_queue(0x04DE).unwrap(), values);
        let too_many: Vec<Word> = (0..32).collect();
        assert_eq!(
            store.set_fifo_queue(0x04DE, &too_many).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            store.read_fifo_queue(0x0000).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn diagnostic_counters() {
        let store = small_store();
        store.record(CounterEvent::ServerMessage);
        store.record(CounterEvent::ServerMessage);
        store.record(CounterEvent::BusException);
        assert_eq!(
            store
                .diagnostics(DiagnosticSubFunction::ReturnServerMessageCount, 0)
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .diagnostics(DiagnosticSubFunction::ReturnBusExceptionErrorCount, 0)
                .unwrap(),
            1
        );
        store
            .diagnostics(DiagnosticSubFunction::ClearCountersAndDiagnosticRegister, 0)
            .unwrap();
        assert_eq!(
            store
                .diagnostics(DiagnosticSubFunction::ReturnServerMessageCount, 0)
                .unwrap(),
            0
        );
    }

    #[test]
    fn comm_event_log_tracks_messages() {
        let store = small_store();
        store.record(CounterEvent::BusMessage);
        store.record(CounterEvent::ServerMessage);
        let (status, events) = store.comm_event_counter().unwrap();
        assert_eq!(status, 0x0000);
        assert_eq!(events, 1);
        let log = store.comm_event_log().unwrap();
        assert_eq!(log.event_count, 1);
        assert_eq!(log.message_count, 1);
        assert_eq!(log.events, vec![EVENT_RECEIVE]);
    }

    #[test]
    fn restart_communications_validates_data_field() {
        let store = small_store();
        assert_eq!(
            store
                .diagnostics(DiagnosticSubFunction::RestartCommunicationsOption, 0x1234)
                .unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        store.record(CounterEvent::ServerMessage);
        store
            .diagnostics(DiagnosticSubFunction::RestartCommunicationsOption, 0xFF00)
            .unwrap();
        assert_eq!(
            store
                .diagnostics(DiagnosticSubFunction::ReturnServerMessageCount, 0)
                .unwrap(),
            0
        );
        assert!(store.comm_event_log().unwrap().events.is_empty());
    }

    #[test]
    fn exception_status() {
        let store = small_store();
        assert_eq!(store.read_exception_status().unwrap(), 0);
        store.set_exception_status(0x55).unwrap();
        assert_eq!(store.read_exception_status().unwrap(), 0x55);
    }
}
