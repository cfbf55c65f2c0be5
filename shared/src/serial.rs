// https://www.lammertbies.nl/comm/info/serial-uart
// QEMU's `virt` machine maps a 16550-compatible UART at 0x1000_0000.

use core::{
    fmt,
    ptr::{read_volatile, write_volatile},
    sync::atomic::{AtomicBool, Ordering},
};

const UART_BASE: usize = 0x1000_0000;
const THR: usize = 0; // Transmitter Holding Reg (write-only)
const IER: usize = 1; // Interrupt Enable Reg
const FCR: usize = 2; // FIFO Control Reg (write-only)
const LCR: usize = 3; // Line Control Register
const LSR: usize = 5; // Line Status Register (read-only)

const LSR_TX_IDLE: u8 = 1 << 5;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Handle to the console UART. Writes are unbuffered and poll the line status
/// register, so this works before interrupts are set up.
pub struct SerialPort;

unsafe fn write_reg(reg: usize, value: u8) {
    write_volatile((UART_BASE + reg) as *mut u8, value);
}

unsafe fn read_reg(reg: usize) -> u8 {
    read_volatile((UART_BASE + reg) as *const u8)
}

impl SerialPort {
    fn ensure_initialized(&self) {
        if INITIALIZED.swap(true, Ordering::AcqRel) {
            return;
        }

        // SAFETY: The UART registers are identity mapped on this machine.
        unsafe {
            write_reg(IER, 0x00);
            write_reg(LCR, 0x80); // Unlock the baud rate divisor.
            write_reg(THR, 0x03); // 38.4K baud.
            write_reg(IER, 0x00);
            write_reg(LCR, 0x03); // 8 bits, no parity.
            write_reg(FCR, 0x07); // Reset and enable the FIFOs.
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.ensure_initialized();

        for b in s.bytes() {
            // SAFETY: Waits for the holding register to drain before writing.
            unsafe {
                while read_reg(LSR) & LSR_TX_IDLE == 0 {
                    core::hint::spin_loop();
                }
                write_reg(THR, b);
            }
        }

        Ok(())
    }
}
