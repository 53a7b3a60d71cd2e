use dotmatrix_core::{cartridge::Cartridge, gameboy::GameBoy};

/// Build a minimal 32KB no-mapper ROM image (mapper 0x00, ROM-size code 0,
/// RAM-size code 0) with `program` placed at the 0x0100 entry point.
#[allow(dead_code)]
pub fn rom_with_program(program: &[u8]) -> Cartridge {
    let mut data = vec![0u8; 0x8000];
    data[0x0100..0x0100 + program.len()].copy_from_slice(program);
    Cartridge::load(data).expect("synthetic ROM must parse")
}

/// A machine with `program` loaded at the entry point.
#[allow(dead_code)]
pub fn gb_with_program(program: &[u8]) -> GameBoy {
    GameBoy::with_cartridge(rom_with_program(program))
}

/// Step until the CPU reaches `pc`, with a step budget so a wedged test
/// fails instead of hanging.
#[allow(dead_code)]
pub fn run_until_pc(gb: &mut GameBoy, pc: u16, max_steps: u32) {
    for _ in 0..max_steps {
        if gb.cpu.pc == pc && !gb.cpu.mid_instruction() {
            return;
        }
        gb.step();
    }
    panic!("PC never reached {pc:#06x} (stopped at {:#06x})", gb.cpu.pc);
}
