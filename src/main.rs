use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use argh::FromArgs;

use brain_diffusion::config::AnalysisConfig;
use brain_diffusion::histogram::{Analysis, HistogramOptions, Theta, histogram_by_video};
use brain_diffusion::msd::{MsdOptions, analyze_sample};
use brain_diffusion::plot::{LinePlotOptions, graph_single_variable};
use brain_diffusion::samples::{GelGrid, PupGrid};
use brain_diffusion::summary::{SeriesMap, prepare_gel_study, prepare_pup_study};

/// MSD analysis of nanoparticle trajectories
#[derive(FromArgs, Debug)]
struct Args {
    /// JSON config file; flags override its values
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Msd(MsdCmd),
    Hist(HistCmd),
    Average(AverageCmd),
    Plot(PlotCmd),
}

/// stack the videos of one sample and write SM1x/SM1y/SM2xy/geoM2xy/gSEM
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "msd")]
struct MsdCmd {
    /// folder holding the trajectory files
    #[argh(option, short = 'f')]
    folder: PathBuf,

    /// sample name substituted for {name} in the file template
    #[argh(option, short = 'n')]
    name: String,

    /// number of videos (files numbered from 1)
    #[argh(option, short = 'v')]
    videos: Option<usize>,

    /// discard tracks with fewer recorded frames
    #[argh(option)]
    cut: Option<usize>,

    /// maximum number of frames kept
    #[argh(option)]
    max_frames: Option<usize>,

    /// output directory (default: the trajectory folder)
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

/// per-frame histograms of an SM2xy matrix
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "hist")]
struct HistCmd {
    /// frames x particles MSD csv
    #[argh(positional)]
    input: PathBuf,

    /// msd or diffusion
    #[argh(option)]
    theta: Option<Theta>,

    /// log or raw
    #[argh(option)]
    analysis: Option<Analysis>,

    /// frame rate used for diffusion coefficients
    #[argh(option)]
    fps: Option<f64>,

    /// frame to histogram (repeatable)
    #[argh(option)]
    frame: Vec<usize>,

    /// number of bins
    #[argh(option)]
    bins: Option<usize>,

    /// output directory (default: next to the input)
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

/// average replicate MSDs of a sample grid and write averages.csv and sd.csv
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "average")]
struct AverageCmd {
    /// sample grid JSON
    #[argh(option)]
    grid: PathBuf,

    /// path template of each sample's geoM2xy csv
    #[argh(option)]
    template: String,

    /// the grid describes brain slices (pups) rather than gels
    #[argh(switch)]
    pups: bool,

    /// frames to average over (default: the shortest series)
    #[argh(option)]
    frames: Option<usize>,

    /// output directory
    #[argh(option, short = 'o', default = "PathBuf::from(\".\")")]
    output: PathBuf,
}

/// plot averaged MSDs of the series matching two name parts
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "plot")]
struct PlotCmd {
    /// sample grid JSON
    #[argh(option)]
    grid: PathBuf,

    /// path template of each sample's geoM2xy csv
    #[argh(option)]
    template: String,

    /// the grid describes brain slices (pups) rather than gels
    #[argh(switch)]
    pups: bool,

    /// first name part every plotted series contains
    #[argh(option)]
    name1: String,

    /// second name part every plotted series contains
    #[argh(option)]
    name2: String,

    /// frames to average over (default: the shortest series)
    #[argh(option)]
    frames: Option<usize>,

    /// output directory
    #[argh(option, short = 'o', default = "PathBuf::from(\".\")")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args: Args = argh::from_env();
    let config = AnalysisConfig::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Msd(cmd) => run_msd(cmd, &config),
        Command::Hist(cmd) => run_hist(cmd, &config),
        Command::Average(cmd) => run_average(cmd, &config),
        Command::Plot(cmd) => run_plot(cmd, &config),
    }
}

fn run_msd(cmd: MsdCmd, config: &AnalysisConfig) -> Result<()> {
    let mut options = MsdOptions::from_config(config);
    if let Some(v) = cmd.videos {
        options.total_videos = v;
    }
    if let Some(cut) = cmd.cut {
        options.cut = cut;
    }
    if cmd.max_frames.is_some() {
        options.max_frames = cmd.max_frames;
    }
    let output = cmd.output.unwrap_or_else(|| cmd.folder.clone());
    let result = analyze_sample(&cmd.folder, &cmd.name, &options, &output)?;
    log::info!(
        "'{}': {} lags, {} particles",
        cmd.name,
        result.geo_m2xy.len(),
        result.sm2xy.particles()
    );
    Ok(())
}

fn run_hist(cmd: HistCmd, config: &AnalysisConfig) -> Result<()> {
    let mut options = HistogramOptions::from_config(config);
    if let Some(theta) = cmd.theta {
        options.theta = theta;
    }
    if let Some(analysis) = cmd.analysis {
        options.analysis = analysis;
    }
    if let Some(fps) = cmd.fps {
        options.fps = fps;
    }
    if !cmd.frame.is_empty() {
        options.frame_range = cmd.frame;
    }
    if let Some(bins) = cmd.bins {
        options.bins = bins;
    }
    if cmd.output.is_some() {
        options.output_dir = cmd.output;
    }
    histogram_by_video(&cmd.input, &options)?;
    Ok(())
}

/// Averages, standard deviations and time arrays of either grid kind.
struct Averaged {
    averages: SeriesMap,
    sds: SeriesMap,
    time: Vec<f64>,
    time_sd: Vec<f64>,
}

fn load_and_average(
    grid: &Path,
    template: &str,
    pups: bool,
    frames: Option<usize>,
    config: &AnalysisConfig,
    save_to: Option<&Path>,
) -> Result<Averaged> {
    let sd_frames = &config.plot.sd_frames;
    if pups {
        let grid = PupGrid::from_json_file(grid)?;
        let study = prepare_pup_study(template, frames, sd_frames, &config.conversion, &grid)?;
        if let Some(dir) = save_to {
            study.save(dir)?;
        }
        Ok(Averaged {
            averages: study.average_over_pups,
            sds: study.sd_over_pups,
            time: study.time,
            time_sd: study.time_sd,
        })
    } else {
        let grid = GelGrid::from_json_file(grid)?;
        let study = prepare_gel_study(template, frames, sd_frames, &config.conversion, &grid)?;
        if let Some(dir) = save_to {
            study.save(dir)?;
        }
        Ok(Averaged {
            averages: study.averages,
            sds: study.sds,
            time: study.time,
            time_sd: study.time_sd,
        })
    }
}

fn run_average(cmd: AverageCmd, config: &AnalysisConfig) -> Result<()> {
    load_and_average(&cmd.grid, &cmd.template, cmd.pups, cmd.frames, config, Some(&cmd.output))?;
    Ok(())
}

fn run_plot(cmd: PlotCmd, config: &AnalysisConfig) -> Result<()> {
    let averaged = load_and_average(&cmd.grid, &cmd.template, cmd.pups, cmd.frames, config, None)?;
    let options = LinePlotOptions::from_config(&config.plot);
    let axes = graph_single_variable(
        &averaged.averages,
        &averaged.sds,
        &averaged.time,
        &averaged.time_sd,
        &config.plot.sd_frames,
        &cmd.name1,
        &cmd.name2,
        &options,
        &cmd.output,
    )
    .with_context(|| format!("plotting '{}' x '{}'", cmd.name1, cmd.name2))?;
    log::info!("Plot written to {}", axes.path.display());
    Ok(())
}
