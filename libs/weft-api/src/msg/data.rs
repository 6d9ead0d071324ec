//! One-way data message carrying an opaque payload buffer.

use crate::error::Error;
use crate::msg::{MsgHeader, check_msg_name};
use crate::value::Buf;

#[derive(Debug, Clone)]
pub struct Data {
    pub header: MsgHeader,
    pub buf: Buf,
}

impl Data {
    pub fn create(name: &str) -> Result<Data, Error> {
        check_msg_name(name)?;
        Ok(Data { header: MsgHeader::new(name), buf: Buf::default() })
    }

    pub fn create_empty() -> Data {
        Data { header: MsgHeader::new(""), buf: Buf::default() }
    }

    /// Allocate an owned zeroed payload of `size` bytes.
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

    /// Borrow the payload mutably, marking the message as holding a locked
    /// resource until [`unlock_buf`](Self::unlock_buf) runs. A locked
    /// message is rejected by the send path.
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
