use anyhow::{Context, Result};
use clap::Parser;
use mnist::{DatasetKind, Split, load_split};
use std::path::PathBuf;
use training::to_grayscale;
use train_mnist::experiment::prepare_data;

/// Saves the first images of both splits of a dataset as PNG files.
#[derive(Parser)]
#[command(name = "save_mnist_images", long_about = None)]
struct Args {
    /// Save Fashion-MNIST images instead of digits
    #[arg(long)]
    fashion: bool,
    /// Directory holding the IDX files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Download missing dataset files
    #[arg(long)]
    download: bool,
    /// Images saved per split
    #[arg(long, default_value_t = 5)]
    count: usize,
    #[arg(long, default_value = ".")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let kind = if args.fashion {
        DatasetKind::FashionMnist
    } else {
        DatasetKind::Mnist
    };
    let data_dir = args.data_dir.unwrap_or_else(|| kind.default_dir());
    prepare_data(kind, &data_dir, args.download)?;
    std::fs::create_dir_all(&args.output).context("Failed to create output directory")?;

    for (split, prefix) in [(Split::Train, "train"), (Split::Test, "test")] {
        println!("\nProcessing {split} data...");
        let data = load_split(kind, &data_dir, split)
            .with_context(|| format!("Failed to load the {split} split"))?;

        for index in 0..args.count.min(data.len()) {
            let (Some(image), Some(label)) = (data.image(index), data.label(index)) else {
                continue;
            };
            let path = args.output.join(format!("{prefix}_image_{index}.png"));
            to_grayscale(image)
                .save(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            println!(
                "{split} image {index} label: {label} ({})",
                kind.class_name(usize::from(label))
            );
        }
    }

    println!(
        "\nImages have been saved as PNG files in {}.",
        args.output.display()
    );
    Ok(())
}
