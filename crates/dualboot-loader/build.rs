//! Places the loader in the first 252 KiB of flash, below the metadata
//! sector, and exports the device size to `main.rs`.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

const FLASH_SIZE: usize = 4 * 1024 * 1024;

const MEMORY_X: &str = r#"MEMORY {
    FLASH : ORIGIN = 0x10000000, LENGTH = 252K
    RAM : ORIGIN = 0x20000000, LENGTH = 512K
    SRAM4 : ORIGIN = 0x20080000, LENGTH = 4K
    SRAM5 : ORIGIN = 0x20081000, LENGTH = 4K
}

SECTIONS {
    .start_block : ALIGN(4)
    {
        __start_block_addr = .;
        KEEP(*(.start_block));
        KEEP(*(.boot_info));
    } > FLASH
} INSERT AFTER .vector_table;

_stext = ADDR(.start_block) + SIZEOF(.start_block);

SECTIONS {
    .bi_entries : ALIGN(4)
    {
        __bi_entries_start = .;
        KEEP(*(.bi_entries));
        . = ALIGN(4);
        __bi_entries_end = .;
    } > FLASH
} INSERT AFTER .text;

SECTIONS {
    .end_block : ALIGN(4)
    {
        __end_block_addr = .;
        KEEP(*(.end_block));
    } > FLASH
} INSERT AFTER .uninit;

PROVIDE(start_to_end = __end_block_addr - __start_block_addr);
PROVIDE(end_to_start = __start_block_addr - __end_block_addr);
"#;

fn main() {
    let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR"));

    File::create(out.join("memory.x"))
        .and_then(|mut file| file.write_all(MEMORY_X.as_bytes()))
        .expect("write memory.x");
    File::create(out.join("memory_consts.rs"))
        .and_then(|mut file| writeln!(file, "pub const FLASH_SIZE: usize = {FLASH_SIZE};"))
        .expect("write memory_consts.rs");

    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
