// gpio_button_events.rs - Counts button presses through an edge callback, and
// waits for a long press to exit.
//
// Connect a push button between header position 11 and ground. The internal
// pull-up resistor keeps the input high while the button is released.

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sbc_gpio::gpio::{Direction, Edge, Gpio, NumberingMode, PullUpDown};
use sbc_gpio::system::{BoardDescriptor, ChipFamily};

// Header position 11 is tied to BCM GPIO 17.
const CHANNEL_BUTTON: u8 = 11;
const DEBOUNCE: Duration = Duration::from_millis(50);

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let gpio = Gpio::new(BoardDescriptor::new(ChipFamily::Bcm, 3));
    gpio.set_numbering(NumberingMode::HeaderPosition)?;
    gpio.setup(CHANNEL_BUTTON, Direction::Input, PullUpDown::PullUp, None)?;

    let presses = Arc::new(AtomicUsize::new(0));

    gpio.add_event_detect(CHANNEL_BUTTON, Edge::Falling, Some(DEBOUNCE))?;
    gpio.add_event_callback(CHANNEL_BUTTON, {
        let presses = presses.clone();
        move |channel| {
            let count = presses.fetch_add(1, Ordering::SeqCst) + 1;
            println!("Button on channel {} pressed ({} total)", channel, count);
        }
    })?;

    println!("Press the button. Stop pressing it for 10 seconds to exit.");

    // Poll the detected flag until the button has been idle for 10 seconds.
    loop {
        std::thread::sleep(Duration::from_secs(10));
        if !gpio.event_detected(CHANNEL_BUTTON)? {
            break;
        }
    }

    gpio.remove_event_detect(CHANNEL_BUTTON)?;

    // Block until the next press, using a transient watcher.
    println!("Press the button once more to confirm.");
    match gpio.wait_for_edge(CHANNEL_BUTTON, Edge::Falling, Some(DEBOUNCE), Some(Duration::from_secs(30)))? {
        Some(channel) => println!("Confirmed on channel {}", channel),
        None => println!("Timed out"),
    }

    println!("{} presses counted", presses.load(Ordering::SeqCst));

    Ok(())
}
