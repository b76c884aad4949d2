//! The kernel log console.
//!
//! Forwards `log` records to every attached text sink (a serial port, a
//! framebuffer, or a host buffer under test).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use spin::{Mutex, Once};

type Sink = Box<dyn Write + Send>;

pub struct Console {
    has_output: AtomicBool,
    sinks: Mutex<Vec<Sink>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub const fn new() -> Self {
        Self {
            has_output: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Installs the default console as the global logger.
    pub fn init() -> Result<&'static Self, log::SetLoggerError> {
        let console = DEFAULT.call_once(Self::new);
        console.install()?;
        Ok(console)
    }

    pub fn install(&'static self) -> Result<(), log::SetLoggerError> {
        log::set_logger(self)?;

        #[cfg(debug_assertions)]
        log::set_max_level(LevelFilter::Trace);

        #[cfg(not(debug_assertions))]
        log::set_max_level(LevelFilter::Info);

        Ok(())
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(Ordering::SeqCst)
    }

    pub fn attach(&self, sink: impl Write + Send + 'static) {
        self.sinks.lock().push(Box::new(sink));
        self.has_output.store(true, Ordering::SeqCst);
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        for sink in self.sinks.lock().iter_mut() {
            // A sink that cannot keep up drops the record.
            let _ = write_log_entry_to(sink.as_mut(), record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(writer: &mut dyn Write, record: &log::Record) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
