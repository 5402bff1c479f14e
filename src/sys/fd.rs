use std::io::{self, Read, Write, IoSlice, IoSliceMut};
use std::os::unix::io::{FromRawFd, AsRawFd, IntoRawFd, RawFd};

use libc::{c_int, c_void};

use super::commom::AsInner;

/// A thin owning wrapper around a raw file descriptor, closed on drop.
#[derive(Debug)]
pub struct FileDesc(RawFd);

impl FileDesc {
    pub unsafe fn new(fd: RawFd) -> Self {
        FileDesc(fd)
    }

    pub fn raw(&self) -> RawFd {
        self.0
    }

    pub fn into_raw(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }

    pub fn try_clone(&self) -> io::Result<FileDesc> {
        self.duplicate()
    }

    pub fn duplicate(&self) -> io::Result<FileDesc> {
        let fd = crate::syscall!(fcntl(self.0, libc::F_DUPFD_CLOEXEC, 0))?;
        Ok(FileDesc(fd))
    }

    pub fn set_cloexec(&self) -> io::Result<()> {
        crate::syscall!(fcntl(self.0, libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(())
    }

    pub fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let n = crate::syscall!(readv(
            self.0,
            bufs.as_ptr() as *const libc::iovec,
            std::cmp::min(bufs.len(), libc::c_int::MAX as usize) as c_int
        ))?;
        Ok(n as usize)
    }

    pub fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let n = crate::syscall!(writev(
            self.0,
            bufs.as_ptr() as *const libc::iovec,
            std::cmp::min(bufs.len(), libc::c_int::MAX as usize) as c_int
        ))?;
        Ok(n as usize)
    }
}

impl AsInner<c_int> for FileDesc {
    fn as_inner(&self) -> &c_int {
        &self.0
    }
}

impl FromRawFd for FileDesc {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        FileDesc(fd)
    }
}

impl AsRawFd for FileDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl IntoRawFd for FileDesc {
    fn into_raw_fd(self) -> RawFd {
        self.into_raw()
    }
}

impl Read for FileDesc {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Read for &FileDesc {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = crate::syscall!(read(self.0, buf.as_mut_ptr() as *mut c_void, buf.len()))?;
        Ok(n as usize)
    }
}

impl Write for FileDesc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &FileDesc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = crate::syscall!(write(self.0, buf.as_ptr() as *const c_void, buf.len()))?;
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileDesc {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.0);
        }
    }
}
