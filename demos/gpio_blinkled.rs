// gpio_blinkled.rs - Blinks an LED in a loop, while handling any incoming
// SIGINT (Ctrl-C) and SIGTERM signals so the pin can be reset before the
// application exits.
//
// Remember to add a resistor of an appropriate value in series, to prevent
// exceeding the maximum current rating of the GPIO pin and the LED.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// The simple-signal crate is used to handle incoming signals.
use simple_signal::{self, Signal};

use sbc_gpio::gpio::{Direction, Gpio, Level, NumberingMode, PullUpDown};
use sbc_gpio::system::{BoardDescriptor, ChipFamily};

// Header position 16 is tied to BCM GPIO 23.
const CHANNEL_LED: u8 = 16;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    // Revision 3 covers every board with a 40-pin header.
    let gpio = Gpio::new(BoardDescriptor::new(ChipFamily::Bcm, 3));
    gpio.set_numbering(NumberingMode::HeaderPosition)?;
    gpio.setup(CHANNEL_LED, Direction::Output, PullUpDown::Off, Some(Level::Low))?;

    let running = Arc::new(AtomicBool::new(true));

    // When a SIGINT (Ctrl-C) or SIGTERM signal is caught, atomically set running to false.
    simple_signal::set_handler(&[Signal::Int, Signal::Term], {
        let running = running.clone();
        move |_| {
            running.store(false, Ordering::SeqCst);
        }
    });

    // Blink the LED until running is set to false.
    let mut level = Level::Low;
    while running.load(Ordering::SeqCst) {
        level = !level;
        gpio.output(CHANNEL_LED, level)?;
        thread::sleep(Duration::from_millis(500));
    }

    gpio.output(CHANNEL_LED, Level::Low)?;
    gpio.cleanup();

    Ok(())
}
