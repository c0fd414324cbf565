mod args;
mod utils;

use crate::args::Opt;
use crate::utils::{bgra_to_rgba, parse_hex_color, save_rgb_png, save_rgba_png};

use clap::Parser;
use icon_layers::config::PipelineConfig;
use icon_layers::image::{cluster_contours, count_clusters};
use icon_layers::pipeline::{CancelToken, Pipeline};

use std::fmt::Write as _;

fn main() {
    env_logger::init();
    if let Err(e) = try_main() {
        eprintln!("icon_layers: {e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();

    let output_dir = match &opt.output_dir {
        Some(dir) => dir.clone(),
        None => {
            let stem = opt
                .input
                .file_stem()
                .ok_or("input file has no stem")?
                .to_str()
                .ok_or("input file stem is not valid UTF-8")?;
            std::path::PathBuf::from(stem)
        }
    };
    std::fs::create_dir_all(&output_dir)?;

    let input_image = image::open(&opt.input)?.into_rgba8();
    let (width, height) = input_image.dimensions();
    let mut bgra = input_image.into_raw();
    bgra_to_rgba(&mut bgra); // swapping R/B turns the decoded RGBA buffer into BGRA

    let config = PipelineConfig {
        n_segments: opt.n_segments,
        compactness: opt.compactness,
        slic_iterations: opt.slic_iterations,
        number_of_clusters: opt.number_of_clusters,
        cluster_max_iterations: opt.cluster_max_iterations,
        random_seed: opt.seed,
        merge_threshold: opt.merge_threshold,
        ..PipelineConfig::default()
    };

    let token = CancelToken::never();
    let t0 = std::time::Instant::now();

    let clustered = Pipeline::new(bgra.clone(), width, height, config, None)?
        .convert_color(&token)?
        .segment(&token)?
        .cluster(&token)?
        .merge(&token)?;

    let result = clustered.extract_layers(&token)?.into_result();

    let mut display_string = String::new();
    if opt.verbose {
        write!(
            &mut display_string,
            "{} layers ({} superpixels, {} cluster iterations, converged={}) in {:?}",
            result.metadata.final_k,
            result.metadata.num_superpixels,
            result.metadata.cluster_iterations,
            result.metadata.cluster_converged,
            t0.elapsed()
        )?;
    }

    for layer in &result.layers {
        let mut rgba = layer.bgra.clone();
        bgra_to_rgba(&mut rgba);
        let path = output_dir.join(format!("layer-{:02}.png", layer.cluster_id));
        save_rgba_png(&path, &rgba, width, height)?;
    }

    if opt.contours {
        let pixel_clusters: Vec<u32> = (0..(width as usize) * (height as usize))
            .map(|i| {
                result
                    .layers
                    .iter()
                    .find(|layer| layer.bgra[i * 4 + 3] != 0)
                    .map_or(u32::MAX, |layer| layer.cluster_id)
            })
            .collect();

        let mut preview = bgra.clone();
        bgra_to_rgba(&mut preview);
        let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
        for px in preview.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }

        let contour_color = parse_hex_color(&opt.contour_color)?;
        cluster_contours(&mut rgb, width, height, &pixel_clusters, contour_color)?;

        let path = output_dir.join("contours.png");
        save_rgb_png(&path, &rgb, width, height)?;

        if opt.verbose {
            write!(
                &mut display_string,
                ", {} distinct clusters in contour preview",
                count_clusters(&pixel_clusters)
            )?;
        }
    }

    if opt.verbose {
        println!("{display_string}");
    }

    Ok(())
}
