//! Null substrate: every operation succeeds but discards or zeroes data
//! (spec §4.1). Used for measurement runs with output disabled.

use crate::error::TraceResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSubstrate;

impl NullSubstrate {
    pub fn new() -> Self {
        NullSubstrate
    }

    pub fn open_file(&self) -> TraceResult<NullFile> {
        Ok(NullFile { size: 0 })
    }
}

#[derive(Debug, Default)]
pub struct NullFile {
    size: u64,
}

impl NullFile {
    pub fn read(&mut self, buf: &mut [u8]) -> TraceResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    pub fn write(&mut self, buf: &[u8]) -> TraceResult<usize> {
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    pub fn seek(&mut self, _offset: u64) -> TraceResult<()> {
        Ok(())
    }

    pub fn get_size(&mut self) -> TraceResult<u64> {
        Ok(self.size)
    }

    pub fn reset(&mut self) -> TraceResult<()> {
        self.size = 0;
        Ok(())
    }
}
