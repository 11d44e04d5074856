use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Weak};

use libc::{self, c_void, off_t, size_t, MAP_FAILED, MAP_SHARED, O_SYNC, PROT_READ, PROT_WRITE};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::gpio::HalError;
use crate::system::{self, BoardDescriptor, ChipFamily};

const PATH_DEV_GPIOMEM: &str = "/dev/gpiomem";
const PATH_DEV_MEM: &str = "/dev/mem";

// Both chips fit their GPIO registers in a single 4 KiB block.
const BLOCK_SIZE: usize = 4096;

// Number of busy-wait iterations used as set-up and hold time for latched writes.
pub(crate) const SHORT_WAIT_CYCLES: usize = 150;

/// Word-level access to a GPIO register window.
///
/// Offsets are expressed in 32-bit words from the start of the window. For
/// Broadcom chips the window starts at the GPIO block, for sunxi chips at the
/// port controller base (the PIO registers begin at word 0x200).
///
/// Implemented by the memory-mapped hardware window, and by
/// [`mock::FakeRegisters`] for testing.
///
/// [`mock::FakeRegisters`]: mock/struct.FakeRegisters.html
pub trait RegisterMap: fmt::Debug + Send + Sync {
    /// Reads the register at `offset`.
    fn read(&self, offset: usize) -> u32;

    /// Writes `value` to the register at `offset`.
    fn write(&self, offset: usize, value: u32);

    /// Busy-waits long enough for the hardware to latch a control signal.
    fn settle(&self) {
        for _ in 0..SHORT_WAIT_CYCLES {
            std::hint::spin_loop();
        }
    }
}

// Only one hardware window exists per process. Contexts share it through an
// Arc, and it's unmapped when the last one goes away.
static SHARED_MAP: Lazy<Mutex<Weak<MemoryMap>>> = Lazy::new(|| Mutex::new(Weak::new()));

pub(crate) struct MemoryMap {
    mem_ptr: AtomicPtr<u32>,
    chip_family: ChipFamily,
}

impl fmt::Debug for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMap")
            .field("mem_ptr", &self.mem_ptr)
            .field("chip_family", &self.chip_family)
            .finish()
    }
}

impl MemoryMap {
    /// Returns the process-wide register window, mapping it if necessary.
    pub(crate) fn open(board: &BoardDescriptor) -> Result<Arc<MemoryMap>, HalError> {
        let mut shared = SHARED_MAP.lock();

        if let Some(map) = shared.upgrade() {
            if map.chip_family != board.chip_family() {
                return Err(HalError::InUse(map.chip_family));
            }

            return Ok(map);
        }

        let mem_ptr = match board.chip_family() {
            ChipFamily::Bcm => Self::map_bcm(board)?,
            ChipFamily::Sunxi => {
                let base = board.peripheral_base().unwrap_or(system::GPIO_BASE_SUNXI);
                Self::map_devmem(base)
                    .map_err(|e| Self::access_error(e, PATH_DEV_MEM, HalError::Mapping))?
            }
        };

        let map = Arc::new(MemoryMap {
            mem_ptr: AtomicPtr::new(mem_ptr),
            chip_family: board.chip_family(),
        });

        *shared = Arc::downgrade(&map);

        Ok(map)
    }

    fn map_bcm(board: &BoardDescriptor) -> Result<*mut u32, HalError> {
        // Try /dev/gpiomem first. If that fails, try /dev/mem instead. If neither works,
        // report back the error that's the most relevant.
        let gpiomem_err = match Self::map_devgpiomem() {
            Ok(ptr) => {
                debug!("Mapped GPIO registers through {}", PATH_DEV_GPIOMEM);
                return Ok(ptr);
            }
            Err(e) => e,
        };

        debug!("Unable to map {} ({}), falling back to {}", PATH_DEV_GPIOMEM, gpiomem_err, PATH_DEV_MEM);

        let peripheral_base = match board.peripheral_base() {
            Some(base) => base,
            None => system::peripheral_base()?,
        };

        match Self::map_devmem(peripheral_base + system::GPIO_OFFSET_BCM) {
            Ok(ptr) => Ok(ptr),
            Err(MapError::Io(ref e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Solving /dev/gpiomem issues (add user to the gpio group) should be
                // preferred over /dev/mem (run as root).
                if gpiomem_err.kind() == io::ErrorKind::PermissionDenied {
                    Err(HalError::DeviceAccessDenied(String::from(PATH_DEV_GPIOMEM)))
                } else {
                    Err(HalError::DeviceAccessDenied(String::from(PATH_DEV_MEM)))
                }
            }
            Err(e) => Err(Self::access_error(e, PATH_DEV_MEM, HalError::Mapping)),
        }
    }

    fn access_error(
        err: MapError,
        path: &str,
        otherwise: fn(io::Error) -> HalError,
    ) -> HalError {
        match err {
            MapError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                HalError::DeviceAccessDenied(String::from(path))
            }
            MapError::Io(e) => otherwise(e),
            MapError::Allocation => HalError::Allocation,
        }
    }

    fn open_sync(path: &str) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open(path)
    }

    fn map_devgpiomem() -> io::Result<*mut u32> {
        // /dev/gpiomem exposes the GPIO block at offset 0, and doesn't require
        // root if the current user is a member of the gpio group.
        let gpiomem_file = Self::open_sync(PATH_DEV_GPIOMEM)?;

        let gpiomem_ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                BLOCK_SIZE,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                gpiomem_file.as_raw_fd(),
                0,
            )
        };

        if gpiomem_ptr == MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(gpiomem_ptr as *mut u32)
    }

    fn map_devmem(physical_address: u32) -> Result<*mut u32, MapError> {
        let mem_file = Self::open_sync(PATH_DEV_MEM).map_err(MapError::Io)?;

        let page_size = page_size();

        // Reserve enough address space to place a page-aligned block inside it.
        let reserved_len = BLOCK_SIZE + page_size - 1;
        let reserved = unsafe {
            libc::mmap(
                ptr::null_mut(),
                reserved_len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if reserved == MAP_FAILED {
            return Err(MapError::Allocation);
        }

        let reserved_start = reserved as usize;
        let aligned = (reserved_start + page_size - 1) & !(page_size - 1);

        let mem_ptr = unsafe {
            libc::mmap(
                aligned as *mut c_void,
                BLOCK_SIZE,
                PROT_READ | PROT_WRITE,
                MAP_SHARED | libc::MAP_FIXED,
                mem_file.as_raw_fd(),
                physical_address as off_t,
            )
        };

        if mem_ptr == MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(reserved, reserved_len as size_t);
            }

            return Err(MapError::Io(err));
        }

        // Give back the slack on either side of the block.
        unsafe {
            let head = aligned - reserved_start;
            if head > 0 {
                libc::munmap(reserved, head as size_t);
            }

            let tail = reserved_len - head - BLOCK_SIZE;
            if tail > 0 {
                libc::munmap((aligned + BLOCK_SIZE) as *mut c_void, tail as size_t);
            }
        }

        debug!("Mapped {:#010x} through {}", physical_address, PATH_DEV_MEM);

        Ok(mem_ptr as *mut u32)
    }

    /// Unmaps the register window. Calling `close` more than once has no effect.
    pub(crate) fn close(&self) {
        let mem_ptr = self.mem_ptr.swap(ptr::null_mut(), Ordering::SeqCst);

        if !mem_ptr.is_null() {
            unsafe {
                libc::munmap(mem_ptr as *mut c_void, BLOCK_SIZE as size_t);
            }
        }
    }

    #[inline(always)]
    fn word_ptr(&self, offset: usize) -> *mut u32 {
        assert!(offset < BLOCK_SIZE / std::mem::size_of::<u32>());

        let mem_ptr = self.mem_ptr.load(Ordering::Relaxed);
        assert!(!mem_ptr.is_null(), "register window used after close");

        unsafe { mem_ptr.add(offset) }
    }
}

impl RegisterMap for MemoryMap {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.word_ptr(offset)) }
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        unsafe {
            ptr::write_volatile(self.word_ptr(offset), value);
        }
    }
}

impl Drop for MemoryMap {
    fn drop(&mut self) {
        self.close();
    }
}

// Required because of the raw pointer to our memory-mapped file
unsafe impl Send for MemoryMap {}
unsafe impl Sync for MemoryMap {}

#[derive(Debug)]
enum MapError {
    Io(io::Error),
    Allocation,
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => BLOCK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert!(page_size() >= BLOCK_SIZE);
    }
}
