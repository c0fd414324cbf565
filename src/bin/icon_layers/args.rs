use clap::Parser;

#[derive(Debug, Parser)]
#[clap(version, about, long_about = None)]
pub struct Opt {
    /// Input icon image file.
    #[clap(short, long)]
    pub input: std::path::PathBuf,

    /// Output directory for extracted layer PNGs; defaults to the input
    /// file's stem, as a directory alongside it.
    #[clap(short, long)]
    pub output_dir: Option<std::path::PathBuf>,

    /// Target SLIC superpixel count. Must be in [50, 10000].
    #[clap(long, default_value_t = 1_000)]
    pub n_segments: u32,

    /// SLIC compactness (spatial vs. color tradeoff). Must be in (0, 100].
    #[clap(long, default_value_t = 25.0)]
    pub compactness: f32,

    /// Fixed SLIC iteration count. Must be in [1, 30].
    #[clap(long, default_value_t = 10)]
    pub slic_iterations: u32,

    /// Number of color clusters -- the layer count before merging. Must be
    /// in [2, 16].
    #[clap(short = 'k', long, default_value_t = 5)]
    pub number_of_clusters: usize,

    /// Lloyd iteration cap for clustering. Must be in [10, 500].
    #[clap(long, default_value_t = 300)]
    pub cluster_max_iterations: u32,

    /// Deterministic seed for the clustering RNG.
    #[clap(long, default_value_t = 0)]
    pub seed: u64,

    /// Merge clusters whose Lab distance is below this threshold; disabled
    /// if unset.
    #[clap(long)]
    pub merge_threshold: Option<f32>,

    /// Also write a PNG with cluster-boundary contours drawn over the
    /// source image.
    #[clap(long)]
    pub contours: bool,

    /// Hexadecimal RGB color for contour lines.
    #[clap(long, default_value = "000000")]
    pub contour_color: String,

    /// Print per-stage timing and the final layer count.
    #[clap(short, long)]
    pub verbose: bool,
}
