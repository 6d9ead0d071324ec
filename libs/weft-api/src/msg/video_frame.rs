//! Video-frame message.

use crate::error::Error;
use crate::msg::{MsgHeader, check_msg_name};
use crate::value::Buf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFmt {
    #[default]
    Rgb24,
    Rgba,
    Bgr24,
    Bgra,
    I420,
    Nv12,
    Nv21,
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub header: MsgHeader,
    pub pixel_fmt: PixelFmt,
    pub width: i32,
    pub height: i32,
    pub is_eof: bool,
    pub data: Buf,
}

impl VideoFrame {
    pub fn create(name: &str) -> Result<VideoFrame, Error> {
        check_msg_name(name)?;
        Ok(Self::with_header(MsgHeader::new(name)))
    }

    pub fn create_empty() -> VideoFrame {
        Self::with_header(MsgHeader::new(""))
    }

    fn with_header(header: MsgHeader) -> VideoFrame {
        VideoFrame {
            header,
            pixel_fmt: PixelFmt::default(),
            width: 0,
            height: 0,
            is_eof: false,
            data: Buf::default(),
        }
    }

    pub fn alloc_buf(&mut self, size: usize) -> &mut [u8] {
        self.data = Buf::Owned(vec![0; size]);
        match &mut self.data {
            Buf::Owned(b) => b,
            Buf::Shared(_) => unreachable!(),
        }
    }

    pub fn set_buf(&mut self, buf: Buf) {
        self.data = buf;
    }

    pub fn lock_buf(&mut self) -> Result<&mut [u8], Error> {
        match &mut self.data {
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
