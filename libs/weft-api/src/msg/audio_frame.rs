//! Audio-frame message: PCM payload plus stream geometry.

use crate::error::Error;
use crate::msg::{MsgHeader, check_msg_name};
use crate::value::Buf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFrameDataFmt {
    #[default]
    Interleave,
    NonInterleave,
}

#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub header: MsgHeader,
    pub sample_rate: i32,
    pub bytes_per_sample: i32,
    pub samples_per_channel: i32,
    pub number_of_channel: i32,
    /// Channel position bitmask.
    pub channel_layout: u64,
    pub data_fmt: AudioFrameDataFmt,
    pub line_size: i32,
    pub is_eof: bool,
    pub buf: Buf,
}

impl AudioFrame {
    pub fn create(name: &str) -> Result<AudioFrame, Error> {
        check_msg_name(name)?;
        Ok(Self::with_header(MsgHeader::new(name)))
    }

    pub fn create_empty() -> AudioFrame {
        Self::with_header(MsgHeader::new(""))
    }

    fn with_header(header: MsgHeader) -> AudioFrame {
        AudioFrame {
            header,
            sample_rate: 0,
            bytes_per_sample: 0,
            samples_per_channel: 0,
            number_of_channel: 0,
            channel_layout: 0,
            data_fmt: AudioFrameDataFmt::default(),
            line_size: 0,
            is_eof: false,
            buf: Buf::default(),
        }
    }

    /// Allocate an owned zeroed payload; the frame owns the buffer. A
    /// caller-provided shared buffer can be attached with `set_buf`
    /// instead.
    pub fn alloc_buf(&mut self, size: usize) -> &mut [u8] {
        self.buf = Buf::Owned(vec![0; size]);
        match &mut self.buf {
            Buf::Owned(b) => b,
            Buf::Shared(_) => unreachable!(),
        }
    }

    pub fn set_buf(&mut self, buf: Buf) {
        self.buf = buf;
    }

    pub fn lock_buf(&mut self) -> Result<&mut [u8], Error> {
        match &mut self.buf {
            Buf::Owned(b) => {
                self.header.has_locked_res = true;
                Ok(b)
            }
            Buf::Shared(_) => Err(Error::generic("cannot lock a shared payload buffer")),
        }
    }

    pub fn unlock_buf(&mut self) {
        self.header.has_locked_res = false;
    }
}
