//! dbt-irdump: translate guest ARM code and print each stage.
//!
//! Input is a raw binary image or a list of hex instruction words.
//! Blocks are translated one after another from `--base`, following
//! the fall-through of each block.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dbt_backend::optimize::optimize;
use dbt_backend::{translate, CodeBuffer, HostCodeGen, TranslateOptions, X86_64CodeGen};
use dbt_core::dump::dump_to_string;
use dbt_core::{BlockKey, Context};
use dbt_exec::{translate_config, JitConfig};
use dbt_frontend::arm::{fetch_decode, translate_block, CodeFetch, Fetched, ModeFlags};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbt-irdump", about = "Dump ARM to x86-64 translation stages")]
struct Args {
    /// Raw guest code image.
    #[arg(short, long, conflicts_with = "words")]
    file: Option<PathBuf>,

    /// Instruction words in hex (32-bit for A32, 16-bit halfwords for Thumb).
    words: Vec<String>,

    /// Guest address of the first byte.
    #[arg(long, default_value = "0x8000", value_parser = parse_hex)]
    base: u32,

    /// Decode as Thumb.
    #[arg(long)]
    thumb: bool,

    /// Big-endian data accesses.
    #[arg(long)]
    big_endian: bool,

    /// Maximum instructions per block.
    #[arg(long, default_value_t = 64)]
    max_insns: u32,

    /// Number of blocks to translate.
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Skip the optimizer.
    #[arg(long)]
    no_opt: bool,

    /// Emit host code and print its size.
    #[arg(long)]
    host: bool,

    /// Write output to a file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("bad hex value {s:?}: {e}"))
}

/// Guest code image mapped at a fixed base.
struct Image {
    base: u32,
    bytes: Vec<u8>,
}

impl Image {
    fn from_words(base: u32, words: &[String], thumb: bool) -> Result<Self, String> {
        let mut bytes = Vec::new();
        for w in words {
            let v = parse_hex(w)?;
            if thumb {
                if v > 0xffff {
                    bytes.extend_from_slice(&((v >> 16) as u16).to_le_bytes());
                }
                bytes.extend_from_slice(&(v as u16).to_le_bytes());
            } else {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        Ok(Self { base, bytes })
    }

    fn end(&self) -> u32 {
        self.base.wrapping_add(self.bytes.len() as u32)
    }

    fn read<const N: usize>(&self, addr: u32) -> Option<[u8; N]> {
        let off = addr.checked_sub(self.base)? as usize;
        self.bytes.get(off..off + N)?.try_into().ok()
    }
}

impl CodeFetch for Image {
    fn fetch16(&self, addr: u32) -> Option<u16> {
        self.read::<2>(addr).map(u16::from_le_bytes)
    }

    fn fetch32(&self, addr: u32) -> Option<u32> {
        self.read::<4>(addr).map(u32::from_le_bytes)
    }
}

fn disassemble(out: &mut impl Write, image: &Image, start: u32, len: u32, thumb: bool) -> io::Result<()> {
    let mut pc = start;
    while pc.wrapping_sub(start) < len {
        let fetched = fetch_decode(image, pc, thumb);
        match fetched {
            Fetched::Insn(insn) => writeln!(out, "  {pc:08x}:  {:08x}  {insn}", insn.raw)?,
            Fetched::Undefined(e) => writeln!(out, "  {pc:08x}:  {e}")?,
            Fetched::Abort { addr } => writeln!(out, "  {pc:08x}:  <abort at {addr:08x}>")?,
        }
        pc = pc.wrapping_add(fetched.len(thumb));
    }
    Ok(())
}

fn run(args: &Args, out: &mut impl Write) -> Result<(), String> {
    let image = match &args.file {
        Some(path) => Image {
            base: args.base,
            bytes: fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?,
        },
        None => Image::from_words(args.base, &args.words, args.thumb)?,
    };
    if image.bytes.is_empty() {
        return Err("no guest code given".into());
    }

    let config = JitConfig {
        max_block_insns: args.max_insns,
        optimize: !args.no_opt,
        ..JitConfig::default()
    };
    config.validate().map_err(|e| e.to_string())?;
    let tcfg = translate_config(&config);

    let mut mode = ModeFlags::empty();
    mode.set(ModeFlags::THUMB, args.thumb);
    mode.set(ModeFlags::BIG_ENDIAN, args.big_endian);

    let mut backend = X86_64CodeGen::new();
    let mut buf = CodeBuffer::new(config.code_region_size).map_err(|e| format!("code buffer: {e}"))?;
    if args.host {
        backend.emit_prologue(&mut buf);
        backend.emit_epilogue(&mut buf);
    }

    let mut ir = Context::new();
    backend.init_context(&mut ir);
    let mut pc = image.base;
    for n in 0..args.count {
        if pc >= image.end() {
            break;
        }
        ir.reset();
        ir.block_id = n as u64 + 1;
        let key = BlockKey::new(pc, mode.bits());
        let info = translate_block(&mut ir, key, &tcfg, &image);
        tracing::debug!(pc, insns = info.icount, "block translated");

        let io = |e: io::Error| e.to_string();
        writeln!(out, "---- block {pc:08x} ({} insns, {} bytes) ----", info.icount, info.guest_len).map_err(io)?;
        disassemble(out, &image, pc, info.guest_len, args.thumb).map_err(io)?;
        writeln!(out, "\n-- IR --\n{}", dump_to_string(&ir)).map_err(io)?;
        if config.optimize {
            let rounds = optimize(&mut ir);
            writeln!(out, "-- IR optimized ({rounds} rounds) --\n{}", dump_to_string(&ir)).map_err(io)?;
        }
        if args.host {
            let opts = TranslateOptions {
                spill_limit: config.spill_limit_bytes,
                trace: false,
            };
            let code = translate(&mut ir, &backend, &mut buf, opts).map_err(|e| e.to_string())?;
            writeln!(
                out,
                "-- host code: {} bytes at +{:#x}, spill {} bytes, chain sites {} --",
                code.size,
                code.start,
                code.spill_bytes,
                code.goto_tb.iter().flatten().count()
            )
            .map_err(io)?;
        }
        writeln!(out).map_err(io)?;

        if info.guest_len == 0 {
            break;
        }
        pc = pc.wrapping_add(info.guest_len);
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let result = match &args.output {
        Some(path) => match fs::File::create(path) {
            Ok(f) => run(&args, &mut BufWriter::new(f)),
            Err(e) => Err(format!("{}: {e}", path.display())),
        },
        None => run(&args, &mut BufWriter::new(io::stdout().lock())),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dbt-irdump: {e}");
            ExitCode::FAILURE
        }
    }
}
