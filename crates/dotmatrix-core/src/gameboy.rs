use crate::{cartridge::Cartridge, cpu::Cpu, mmu::Mmu};

/// The whole machine: one aggregate owning every subsystem's state.
///
/// The host drives it with [`GameBoy::run_frame`], presents the PPU
/// framebuffer, feeds input through `mmu.input`, and drains the APU sample
/// buffer whenever its full flag is raised.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
}

impl GameBoy {
    /// A machine in the post-boot state, with no cartridge inserted.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(),
        }
    }

    pub fn with_cartridge(cart: Cartridge) -> Self {
        let mut gb = Self::new();
        gb.load_cart(cart);
        gb
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.mmu.load_cart(cart);
    }

    /// Advance the machine by exactly one bus cycle.
    ///
    /// Timer/interrupt logic, DMA, PPU and APU tick first, then the CPU, so
    /// a DMA or PPU mode change in this cycle gates this cycle's CPU access.
    pub fn step(&mut self) {
        self.mmu.tick();
        self.cpu.step(&mut self.mmu);
    }

    /// Run until the pixel pipeline completes a frame, clearing the frame
    /// flag. Returns `false` without running once the CPU has latched an
    /// illegal opcode; PPU/APU state stays inspectable for diagnostics.
    pub fn run_frame(&mut self) -> bool {
        while !self.mmu.ppu.frame_ready() {
            if self.cpu.illegal_latched() {
                return false;
            }
            self.step();
        }
        self.mmu.ppu.clear_frame_flag();
        true
    }

    /// Reset to the post-boot state, keeping the loaded cartridge.
    pub fn reset(&mut self) {
        let cart = self.mmu.cart.take();
        self.cpu = Cpu::new();
        self.mmu = Mmu::new();
        if let Some(cart) = cart {
            self.mmu.load_cart(cart);
        }
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
