use apfsdump::apfs::parser::ApfsContainer;
use apfsdump::apfs::walker::WalkSummary;
use apfsdump::cli::{Cli, Mode};
use apfsdump::dmg::parser::DiskImage;
use apfsdump::image::{self, ImageKind};
use apfsdump::materialize::{HostMaterializer, TreePrinter};
use apfsdump::util::format_bytes;
use apfsdump::{eprint_blue, eprint_green, eprintln_red, eprintln_yellow, tracy, Error, Result};

use std::fs::{self, File};
use std::io::{self, Write};

use clap::Parser;
use memmap2::Mmap;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            _ = e.print();
            std::process::exit(apfsdump::cli::usage_exit_code(&e));
        }
    };

    if cli.no_color {
        apfsdump::cli::disable_ansi_coloring();
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .init();

    tracy::start();

    if let Err(e) = run(&cli) {
        report_error(&cli, &e);
        std::process::exit(1);
    }
}

fn report_error(cli: &Cli, e: &Error) {
    let image = cli.image.display();
    match e {
        Error::Io(io) if io.kind() == io::ErrorKind::NotFound => {
            eprintln_red!("error: '{image}' not found");
        }
        Error::Io(io) if io.kind() == io::ErrorKind::PermissionDenied => {
            eprintln_red!("error: permission denied reading '{image}'");
        }
        Error::NotADiskImage => {
            eprintln_red!("error: '{image}': {e}");
        }
        Error::DirectoryExists { path } => {
            eprintln_red!("error: {e}");
            eprintln_red!("help: remove '{}' or pick another --output directory", path.display());
        }
        _ => {
            eprintln_red!("error: {e}");
        }
    }
}

/// Map the container: the image itself, or the APFS partition of a `.dmg`
/// unwrapped to disk first.  `None` means a `.dmg` was only listed.
fn open_container(cli: &Cli) -> Result<Option<Mmap>> {
    let file = File::open(&cli.image)?;
    let kind = image::detect(&file)?;
    log::info!("{}: {}", cli.image.display(), kind.name());

    if kind == ImageKind::Apfs {
        return image::map_file(&file).map(Some);
    }

    let dmg = DiskImage::open(file)?;
    if cli.mode() == Mode::Structure {
        let mut out = io::stdout().lock();
        writeln!(out, "UDIF disk image, {} sectors", dmg.trailer.sector_count)?;
        for part in &dmg.partitions {
            write!(out, "{part}")?;
        }
        return Ok(None);
    }

    let part = image::apfs_partition(&dmg)?;
    let out_path = cli.image_out.clone()
        .unwrap_or_else(|| image::default_image_out(&cli.image, part));

    eprint_blue!("Unwrapping partition {} into {}... ", part.index, out_path.display());
    let len = image::unwrap_udif(&dmg, part, &out_path)?;
    eprint_green!("{}\n", format_bytes(len));

    let unwrapped = File::open(&out_path)?;
    image::map_file(&unwrapped).map(Some)
}

fn run(cli: &Cli) -> Result<()> {
    let Some(mmap) = open_container(cli)? else {
        return Ok(());
    };

    let container = ApfsContainer::open(mmap, cli.reader_options())?;
    tracy::message("checkpoint resolved");

    let mut out = io::stdout().lock();
    match cli.mode() {
        Mode::Structure => write!(out, "{}", container.superblock())?,
        Mode::Container => write!(out, "{}", container.checkpoint)?,
        Mode::Volumes(None) => {
            for (oid, volume) in container.volumes()?.all() {
                match volume {
                    Ok(v) => writeln!(out, "{}", v.superblock)?,
                    Err(e) if !e.is_fatal() => eprintln_red!("error: volume {oid}: {e}"),
                    Err(e) => return Err(e),
                }
            }
        }
        Mode::Volumes(Some(oid)) => match container.volumes()?.find(oid) {
            Ok(v) => write!(out, "{}", v.superblock)?,
            Err(e) if !e.is_fatal() => eprintln_red!("error: {e}"),
            Err(e) => return Err(e),
        },
        Mode::FileSystem => dump_volumes(cli, &container, &mut out)?,
    }

    out.flush()?;
    Ok(())
}

fn dump_volumes<W: Write>(cli: &Cli, container: &ApfsContainer<Mmap>, out: &mut W) -> Result<()> {
    if !cli.dry_run {
        fs::create_dir_all(&cli.output)
            .map_err(|source| Error::OutputFile { path: cli.output.clone(), source })?;
    }

    for (oid, volume) in container.volumes()?.all() {
        let volume = match volume {
            Ok(v) => v,
            Err(e) if !e.is_fatal() => {
                eprintln_red!("error: volume {oid}: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        let walked = if cli.dry_run {
            container.walk_volume(&volume, &mut TreePrinter::new(&mut *out))
        } else {
            eprint_blue!("Extracting volume '{}' into {}...\n", volume.name(), cli.output.display());
            container.walk_volume(&volume, &mut HostMaterializer::new(cli.output.clone()))
        };

        match walked {
            Ok(summary) => report_summary(volume.name(), &summary),
            Err(e) if !e.is_fatal() => eprintln_red!("error: volume '{}': {e}", volume.name()),
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn report_summary(name: &str, s: &WalkSummary) {
    eprint_green!(
        "{name}: {} directories, {} files, {}\n",
        s.directories, s.files, format_bytes(s.bytes)
    );
    if s.orphans > 0 || s.tree.skipped > 0 {
        eprintln_yellow!(
            "{name}: {} records without a known parent, {} unreadable tree nodes skipped",
            s.orphans, s.tree.skipped
        );
    }
}
