use std::io;
use std::os::unix::io::RawFd;
use std::result;
use std::time::Duration;

pub use libc::{epoll_event, EPOLLERR, EPOLLET, EPOLLIN, EPOLLPRI};

pub type Result<T> = result::Result<T, io::Error>;

// Wakes up a thread that's blocked in epoll_wait().
#[derive(Debug)]
pub struct EventFd {
    fd: RawFd,
}

impl EventFd {
    pub fn new() -> Result<EventFd> {
        Ok(EventFd {
            fd: parse_retval!(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_SEMAPHORE) })?,
        })
    }

    pub fn notify(&self) -> Result<()> {
        let buffer: u64 = 1;

        parse_retval!(unsafe {
            libc::write(
                self.fd,
                &buffer as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        })?;

        Ok(())
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[derive(Debug)]
pub struct Epoll {
    fd: RawFd,
}

impl Epoll {
    pub fn new() -> Result<Epoll> {
        Ok(Epoll {
            fd: parse_retval!(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?,
        })
    }

    pub fn add(&self, fd: RawFd, id: u64, event_mask: i32) -> Result<()> {
        let mut event = libc::epoll_event {
            events: event_mask as u32,
            u64: id,
        };

        parse_retval!(unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_ADD, fd, &mut event) })?;

        Ok(())
    }

    pub fn wait(&self, events: &mut [libc::epoll_event], timeout: Option<Duration>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let timeout: i32 = if let Some(duration) = timeout {
            duration.as_millis().min(i32::MAX as u128) as i32
        } else {
            -1
        };

        loop {
            match parse_retval!(unsafe {
                libc::epoll_wait(self.fd, events.as_mut_ptr(), events.len() as i32, timeout)
            }) {
                Ok(num_events) => return Ok(num_events as usize),
                // Retry when a signal handler interrupted the wait.
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
