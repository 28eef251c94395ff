//! Snowflake request ids for SMART requests.
//!
//! 41 bits of milliseconds since a fixed epoch, 5 bits of data center id,
//! 5 bits of worker id and a 12 bit per-millisecond sequence.

use std::time::{SystemTime, UNIX_EPOCH};

use kasa_protocol::{KasaError, Result};

const EPOCH: u64 = 1_420_041_600_000;
const WORKER_ID_BITS: u64 = 5;
const DATA_CENTER_ID_BITS: u64 = 5;
const SEQUENCE_BITS: u64 = 12;

const MAX_WORKER_ID: u64 = (1 << WORKER_ID_BITS) - 1;
const MAX_DATA_CENTER_ID: u64 = (1 << DATA_CENTER_ID_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
pub struct SnowflakeId {
    worker_id: u64,
    data_center_id: u64,
    sequence: u64,
    last_timestamp: u64,
}

impl SnowflakeId {
    pub fn new(worker_id: u64, data_center_id: u64) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(KasaError::invalid_value(format!(
                "Worker ID can't be greater than {MAX_WORKER_ID} or less than 0"
            )));
        }
        if data_center_id > MAX_DATA_CENTER_ID {
            return Err(KasaError::invalid_value(format!(
                "Data center ID can't be greater than {MAX_DATA_CENTER_ID} or less than 0"
            )));
        }
        Ok(Self {
            worker_id,
            data_center_id,
            sequence: 0,
            last_timestamp: 0,
        })
    }

    fn current_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    fn wait_next_millis(last_timestamp: u64) -> u64 {
        let mut timestamp = Self::current_millis();
        while timestamp <= last_timestamp {
            std::hint::spin_loop();
            timestamp = Self::current_millis();
        }
        timestamp
    }

    pub fn generate_id(&mut self) -> Result<u64> {
        let mut timestamp = Self::current_millis();
        if timestamp < self.last_timestamp {
            return Err(KasaError::kasa(
                "Clock moved backwards. Refusing to generate ID.",
            ));
        }

        if timestamp == self.last_timestamp {
            self.sequence = (self.sequence + 1) & SEQUENCE_MASK;
            if self.sequence == 0 {
                timestamp = Self::wait_next_millis(self.last_timestamp);
            }
        } else {
            self.sequence = 0;
        }
        self.last_timestamp = timestamp;
        Ok(self.compose(timestamp))
    }

    /// A clock reading before `EPOCH` maps to a zero time component.
    fn compose(&self, timestamp: u64) -> u64 {
        (timestamp.saturating_sub(EPOCH) << (WORKER_ID_BITS + SEQUENCE_BITS + DATA_CENTER_ID_BITS))
            | (self.data_center_id << (SEQUENCE_BITS + WORKER_ID_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_increasing() {
        let mut ids = SnowflakeId::new(1, 1).unwrap();
        let mut last = 0;
        for _ in 0..5000 {
            let id = ids.generate_id().unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn worker_and_data_center_are_encoded() {
        let mut ids = SnowflakeId::new(3, 7).unwrap();
        let id = ids.generate_id().unwrap();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_WORKER_ID, 3);
        assert_eq!((id >> (SEQUENCE_BITS + WORKER_ID_BITS)) & MAX_DATA_CENTER_ID, 7);
    }

    #[test]
    fn clock_before_epoch_does_not_underflow() {
        let ids = SnowflakeId::new(1, 2).unwrap();
        let id = ids.compose(EPOCH - 1);
        assert_eq!(id >> (WORKER_ID_BITS + SEQUENCE_BITS + DATA_CENTER_ID_BITS), 0);
        assert_eq!((id >> SEQUENCE_BITS) & MAX_WORKER_ID, 1);
        assert_eq!(ids.compose(0), id);
    }

    #[test]
    fn rejects_out_of_range_ids() {
        assert!(SnowflakeId::new(32, 1).is_err());
        assert!(SnowflakeId::new(1, 32).is_err());
    }
}
