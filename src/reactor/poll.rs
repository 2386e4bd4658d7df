//! The `poll_t` back-end abstraction (spec §4.9): "The implementation
//! selects the OS primitive (epoll / kqueue / iocp) behind a uniform
//! `poll_t` interface; the design below is expressed in that uniform form."
//!
//! [`Poller`] is that uniform interface. Linux gets a real `epoll(7)`
//! back-end ([`EpollPoller`]); every other target falls back to a
//! `poll(2)`-based implementation ([`PollFallback`]) that satisfies the same
//! trait with the same edge-triggered-free, level-style semantics. A kqueue
//! or IOCP back-end would be a third struct behind this same trait -- the
//! reactor event loop in [`super`] never matches on which one is active.

use std::io;
use std::os::fd::RawFd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };

    pub fn read_write() -> Interest {
        Interest { readable: true, writable: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// A registered-fd, level-triggered multiplexer. `token` is caller-chosen
/// (the reactor uses its connection registration id, or 0/1/2 for
/// stdin/the listener/the wake pipe) and is echoed back on every [`Event`].
pub trait Poller {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;
    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;
    /// Block up to `timeout_ms` (`None` = forever) and append ready events.
    fn poll(&mut self, timeout_ms: Option<i32>, events: &mut Vec<Event>) -> io::Result<()>;
}

/// Construct the platform's native back-end.
#[cfg(target_os = "linux")]
pub fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(EpollPoller::new()?))
}

#[cfg(not(target_os = "linux"))]
pub fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(PollFallback::new()))
}

#[cfg(target_os = "linux")]
pub struct EpollPoller {
    epfd: RawFd,
}

#[cfg(target_os = "linux")]
impl EpollPoller {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EpollPoller { epfd })
    }

    fn event_for(token: usize, interest: Interest) -> libc::epoll_event {
        let mut flags = 0u32;
        if interest.readable {
            flags |= libc::EPOLLIN as u32;
        }
        if interest.writable {
            flags |= libc::EPOLLOUT as u32;
        }
        libc::epoll_event { events: flags, u64: token as u64 }
    }

    fn ctl(&mut self, op: i32, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut ev = Self::event_for(token, interest);
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl Poller for EpollPoller {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn poll(&mut self, timeout_ms: Option<i32>, events: &mut Vec<Event>) -> io::Result<()> {
        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 256];
        let timeout = timeout_ms.unwrap_or(-1);
        let n = unsafe { libc::epoll_wait(self.epfd, raw.as_mut_ptr(), raw.len() as i32, timeout) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        for ev in &raw[..n as usize] {
            let flags = ev.events as i32;
            events.push(Event {
                token: ev.u64 as usize,
                readable: flags & libc::EPOLLIN != 0,
                writable: flags & libc::EPOLLOUT != 0,
                error: flags & (libc::EPOLLERR | libc::EPOLLHUP) != 0,
            });
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

/// Portable fallback: rebuilds a `pollfd` table from the registration map on
/// every call. O(n) per wait rather than epoll's O(ready), which is the
/// accepted cost of having one back-end that works everywhere libc's
/// `poll(2)` does.
pub struct PollFallback {
    registered: Vec<(RawFd, usize, Interest)>,
}

impl PollFallback {
    pub fn new() -> Self {
        PollFallback { registered: Vec::new() }
    }
}

impl Default for PollFallback {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for PollFallback {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.registered.push((fd, token, interest));
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        if let Some(entry) = self.registered.iter_mut().find(|(f, _, _)| *f == fd) {
            entry.1 = token;
            entry.2 = interest;
        }
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.registered.retain(|(f, _, _)| *f != fd);
        Ok(())
    }

    fn poll(&mut self, timeout_ms: Option<i32>, events: &mut Vec<Event>) -> io::Result<()> {
        if self.registered.is_empty() {
            if let Some(ms) = timeout_ms {
                std::thread::sleep(std::time::Duration::from_millis(ms as u64));
            }
            return Ok(());
        }
        let mut fds: Vec<libc::pollfd> = self
            .registered
            .iter()
            .map(|(fd, _, interest)| {
                let mut events = 0i16;
                if interest.readable {
                    events |= libc::POLLIN;
                }
                if interest.writable {
                    events |= libc::POLLOUT;
                }
                libc::pollfd { fd: *fd, events, revents: 0 }
            })
            .collect();
        let timeout = timeout_ms.unwrap_or(-1);
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        for (pfd, (_, token, _)) in fds.iter().zip(self.registered.iter()) {
            if pfd.revents == 0 {
                continue;
            }
            events.push(Event {
                token: *token,
                readable: pfd.revents & libc::POLLIN != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                error: pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_reports_readable_pipe() {
        let mut fds = [0i32; 2];
        unsafe { assert_eq!(libc::pipe(fds.as_mut_ptr()), 0) };
        let [read_fd, write_fd] = fds;
        let mut poller = PollFallback::new();
        poller.register(read_fd, 7, Interest::READABLE).unwrap();
        unsafe { libc::write(write_fd, b"x".as_ptr() as *const _, 1) };
        let mut events = Vec::new();
        poller.poll(Some(1000), &mut events).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 7);
        assert!(events[0].readable);
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
