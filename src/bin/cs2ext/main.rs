#![deny(
    rust_2018_idioms,
    unreachable_pub,
    unsafe_code,
    unused_imports,
    unused_mut,
    missing_debug_implementations
)]

use anyhow::Context;
use colored::*;
use cs2ext::resource::{hgx::HgxOptions, Container};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::{fs::File, io::Read, path::PathBuf};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(about = "Extract images from CatSystem2 HG-2/HG-3 containers")]
struct Opt {
    /// Files to process
    #[structopt(required = true, name = "CONTAINERS", parse(from_os_str))]
    files: Vec<PathBuf>,

    /// Directory to output extracted files
    #[structopt(
        short = "o",
        long = "output",
        parse(from_os_str),
        default_value = "ext/"
    )]
    output_dir: PathBuf,

    /// Compose frames onto their full-size canvas
    #[structopt(short, long)]
    expand: bool,

    /// Keep the stored bottom-up row order
    #[structopt(short, long)]
    flip: bool,

    /// Write a JSON frame listing next to the extracted images
    #[structopt(short, long)]
    metadata: bool,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    if let Err(err) = extract_containers(&opt) {
        log::error!("Error while extracting: {}", err);
    }
}

fn extract_containers(opt: &Opt) -> anyhow::Result<()> {
    let options = HgxOptions { flip: opt.flip, expand: opt.expand };
    std::fs::create_dir_all(&opt.output_dir)?;

    let progress_bar =
        init_progressbar("Extracting...", opt.files.len() as u64);
    opt.files
        .par_iter()
        .progress_with(progress_bar)
        .filter(|file| file.is_file())
        .try_for_each(|file| {
            if let Err(err) = extract_one(file, opt, options) {
                eprintln!("{} {:?}: {}", "Error:".red(), file, err);
            }
            Ok(())
        })
}

fn extract_one(
    file: &PathBuf,
    opt: &Opt,
    options: HgxOptions,
) -> anyhow::Result<()> {
    let name = file
        .file_name()
        .context("Invalid file name")?
        .to_string_lossy();
    let mut buf = Vec::with_capacity(cs2ext::ONE_MB);
    File::open(file)?.read_to_end(&mut buf)?;

    let container = Container::from_bytes(&buf, &name)?;
    log::debug!("{}: {} frame(s)", name, container.frame_count());
    container.extract_images(&buf, &opt.output_dir, options)?;

    if opt.metadata {
        let mut json_path = opt.output_dir.join(name.as_ref());
        json_path.set_extension("json");
        let json_file = File::create(&json_path)
            .with_context(|| format!("Could not create {:?}", json_path))?;
        serde_json::to_writer_pretty(json_file, &container)?;
    }
    Ok(())
}

fn init_progressbar(prefix: &str, size: u64) -> ProgressBar {
    let progress_bar = ProgressBar::new(size).with_style(
        ProgressStyle::default_bar().template(
            " {spinner} {prefix} {wide_bar:} {pos:>6}/{len:6} ETA:[{eta}]",
        ),
    );
    progress_bar.set_prefix(prefix);
    progress_bar
}
