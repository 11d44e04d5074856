use std::ffi::CString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::linux::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::gpio::epoll::{epoll_event, Epoll, EventFd, EPOLLERR, EPOLLET, EPOLLIN, EPOLLPRI};
use crate::gpio::{Edge, EdgeError, EdgeEvent, EdgeSink, EdgeSource, EdgeWatch, Level};

const PATH_SYSFS_GPIO: &str = "/sys/class/gpio";

// epoll event ids
const ID_STOP: u64 = 0;
const ID_VALUE: u64 = 1;

// Find group ID for specified group name
fn group_name_to_gid(name: &str) -> Option<u32> {
    if let Ok(name_cstr) = CString::new(name) {
        unsafe {
            let group_ptr = libc::getgrnam(name_cstr.as_ptr());

            if !group_ptr.is_null() {
                return Some((*group_ptr).gr_gid);
            }
        }
    }

    None
}

fn edge_name(edge: Edge) -> &'static [u8] {
    match edge {
        Edge::Rising => b"rising",
        Edge::Falling => b"falling",
        Edge::Both => b"both",
    }
}

/// Edge notifications through the kernel's sysfs GPIO interface.
///
/// Watching a pin exports it under `/sys/class/gpio`, configures it as an input
/// with the requested edge, and waits for priority events on its `value` file
/// on a dedicated thread. The pin is unexported when the watch stops.
#[derive(Debug, Clone)]
pub struct SysfsEdgeSource {
    root: PathBuf,
}

impl SysfsEdgeSource {
    /// Constructs a new `SysfsEdgeSource` for `/sys/class/gpio`.
    pub fn new() -> SysfsEdgeSource {
        SysfsEdgeSource::with_root(PATH_SYSFS_GPIO)
    }

    /// Constructs a new `SysfsEdgeSource` for a sysfs GPIO class directory at `root`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> SysfsEdgeSource {
        SysfsEdgeSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn pin_path(&self, pin: u16) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    pub(crate) fn export(&self, pin: u16) -> io::Result<()> {
        // Only export if the pin isn't already exported
        if !self.pin_path(pin).exists() {
            File::create(self.root.join("export"))?.write_fmt(format_args!("{}", pin))?;
        }

        // The exported pin starts off owned by root:root. Wait up to 1s for udev
        // to hand it to the gpio group, so non-root users can configure it.
        let gid_gpio = group_name_to_gid("gpio").unwrap_or(0);

        for _ in 0..20 {
            let meta = fs::metadata(self.pin_path(pin))?;
            if meta.st_gid() == gid_gpio {
                break;
            }

            thread::sleep(Duration::from_millis(50));
        }

        Ok(())
    }

    pub(crate) fn unexport(&self, pin: u16) -> io::Result<()> {
        // Only unexport if the pin is actually exported
        if self.pin_path(pin).exists() {
            File::create(self.root.join("unexport"))?.write_fmt(format_args!("{}", pin))?;
        }

        Ok(())
    }

    pub(crate) fn set_input(&self, pin: u16) -> io::Result<()> {
        File::create(self.pin_path(pin).join("direction"))?.write_all(b"in")
    }

    pub(crate) fn set_edge(&self, pin: u16, edge: Option<Edge>) -> io::Result<()> {
        let name = edge.map(edge_name).unwrap_or(b"none");

        File::create(self.pin_path(pin).join("edge"))?.write_all(name)
    }

    fn open_value(&self, pin: u16) -> io::Result<File> {
        File::open(self.pin_path(pin).join("value"))
    }
}

impl Default for SysfsEdgeSource {
    fn default() -> SysfsEdgeSource {
        SysfsEdgeSource::new()
    }
}

fn read_level(value: &mut File) -> io::Result<Level> {
    let mut buffer = [0; 1];
    value.seek(SeekFrom::Start(0))?;
    value.read_exact(&mut buffer)?;

    match &buffer {
        b"0" => Ok(Level::Low),
        _ => Ok(Level::High),
    }
}

impl EdgeSource for SysfsEdgeSource {
    fn watch(&self, pin: u16, edge: Edge, sink: EdgeSink) -> Result<Box<dyn EdgeWatch>, EdgeError> {
        self.export(pin)?;
        self.set_input(pin)?;
        self.set_edge(pin, Some(edge))?;

        let mut value = self.open_value(pin)?;
        let stop = EventFd::new()?;

        let poll = Epoll::new()?;
        // Reading the current value clears any stale event before polling.
        read_level(&mut value)?;
        poll.add(stop.fd(), ID_STOP, EPOLLERR | EPOLLET | EPOLLIN)?;
        poll.add(value.as_raw_fd(), ID_VALUE, EPOLLERR | EPOLLET | EPOLLPRI)?;

        let poll_thread = thread::Builder::new()
            .name(format!("gpio-sysfs-{}", pin))
            .spawn(move || -> io::Result<()> {
                let mut events = [epoll_event { events: 0, u64: 0 }; 2];
                loop {
                    let num_events = poll.wait(&mut events, None)?;
                    for event in &events[0..num_events] {
                        if event.u64 == ID_STOP {
                            return Ok(());
                        }

                        let timestamp = Instant::now();
                        let level = read_level(&mut value)?;
                        if !sink.send(EdgeEvent { level, timestamp }) {
                            return Ok(());
                        }
                    }
                }
            })?;

        debug!("Watching pin {} for {:?} edges through sysfs", pin, edge);

        Ok(Box::new(SysfsWatch {
            source: self.clone(),
            pin,
            poll_thread: Some(poll_thread),
            stop,
        }))
    }
}

struct SysfsWatch {
    source: SysfsEdgeSource,
    pin: u16,
    poll_thread: Option<thread::JoinHandle<io::Result<()>>>,
    stop: EventFd,
}

impl fmt::Debug for SysfsWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysfsWatch")
            .field("pin", &self.pin)
            .field("poll_thread", &self.poll_thread)
            .field("stop", &self.stop)
            .finish()
    }
}

impl EdgeWatch for SysfsWatch {
    fn stop(&mut self) -> Result<(), EdgeError> {
        self.stop.notify()?;

        if let Some(poll_thread) = self.poll_thread.take() {
            match poll_thread.join() {
                Ok(result) => result?,
                Err(_) => return Err(EdgeError::ThreadPanic),
            }
        }

        Ok(())
    }
}

impl Drop for SysfsWatch {
    fn drop(&mut self) {
        if self.poll_thread.is_some() {
            if let Err(e) = self.stop() {
                error!("Failed to stop sysfs watch on pin {}: {}", self.pin, e);
            }
        }

        // Unexport here, because we can't rely on the thread living long enough.
        self.source.set_edge(self.pin, None).ok();
        self.source.unexport(self.pin).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    fn exported(root: &Path, pin: u16) {
        fs::create_dir_all(root.join(format!("gpio{}", pin))).unwrap();
    }

    #[test]
    fn export_writes_pin_number() {
        let root = tempfile::tempdir().unwrap();
        let source = SysfsEdgeSource::with_root(root.path());

        // Exporting fails once the kernel doesn't create the pin directory.
        assert!(source.export(17).is_err());
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "17");
    }

    #[test]
    fn export_skips_exported_pins() {
        let root = tempfile::tempdir().unwrap();
        let source = SysfsEdgeSource::with_root(root.path());
        exported(root.path(), 23);

        source.export(23).unwrap();
        assert!(!root.path().join("export").exists());
    }

    #[test]
    fn configures_direction_and_edge() {
        let root = tempfile::tempdir().unwrap();
        let source = SysfsEdgeSource::with_root(root.path());
        exported(root.path(), 4);

        source.set_input(4).unwrap();
        source.set_edge(4, Some(Edge::Falling)).unwrap();
        assert_eq!(fs::read_to_string(root.path().join("gpio4/direction")).unwrap(), "in");
        assert_eq!(fs::read_to_string(root.path().join("gpio4/edge")).unwrap(), "falling");

        source.set_edge(4, Some(Edge::Both)).unwrap();
        assert_eq!(fs::read_to_string(root.path().join("gpio4/edge")).unwrap(), "both");

        source.set_edge(4, None).unwrap();
        assert_eq!(fs::read_to_string(root.path().join("gpio4/edge")).unwrap(), "none");
    }

    #[test]
    fn unexport_only_exported_pins() {
        let root = tempfile::tempdir().unwrap();
        let source = SysfsEdgeSource::with_root(root.path());

        source.unexport(5).unwrap();
        assert!(!root.path().join("unexport").exists());

        exported(root.path(), 5);
        source.unexport(5).unwrap();
        assert_eq!(fs::read_to_string(root.path().join("unexport")).unwrap(), "5");
    }

    #[test]
    fn reads_value_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("value");

        fs::write(&path, "1\n").unwrap();
        assert_eq!(read_level(&mut File::open(&path).unwrap()).unwrap(), Level::High);

        fs::write(&path, "0\n").unwrap();
        assert_eq!(read_level(&mut File::open(&path).unwrap()).unwrap(), Level::Low);
    }
}
