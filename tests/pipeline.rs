use std::fmt::Write as _;
use std::path::Path;

use approx::assert_relative_eq;
use brain_diffusion::data::loader::{load_matrix, load_series};
use brain_diffusion::data::model::Conversion;
use brain_diffusion::histogram::{Analysis, HistogramOptions, Theta, histogram_by_video};
use brain_diffusion::msd::{MsdOptions, analyze_sample, msd_iteration};
use brain_diffusion::plot::{LinePlotOptions, graph_single_variable};
use brain_diffusion::samples::{GelGrid, PupGrid};
use brain_diffusion::summary::{prepare_gel_study, prepare_pup_study};

fn write_mosaic(path: &Path, rows: &[(i64, i64, f64, f64)]) {
    let mut text = String::from("Trajectory,Frame,x,y,z,m0,m1,m2,m3,m4,NPscore\n");
    for (p, f, x, y) in rows {
        writeln!(text, "{p},{f},{x},{y},0,1,0,0,0,0,0").unwrap();
    }
    std::fs::write(path, text).unwrap();
}

fn unit_options(videos: usize) -> MsdOptions {
    MsdOptions {
        cut: 2,
        total_videos: videos,
        max_frames: None,
        conversion: Conversion {
            microns_per_pixel: 1.0,
            ..Conversion::default()
        },
        ..MsdOptions::default()
    }
}

/// Video 1: particle 1 moves +1 px in x per frame over frames 0-4, particle 2
/// is seen once. Video 2: particle 7 moves +2 px in y over frames 2-5.
fn two_videos(dir: &Path) {
    first_video(dir, "beads");
    let v2: Vec<_> = (2..6).map(|f| (7, f, 3.0, 2.0 * f as f64)).collect();
    write_mosaic(&dir.join("Traj_beads_2.tif.csv"), &v2);
}

fn first_video(dir: &Path, name: &str) {
    let mut v1: Vec<_> = (0..5).map(|f| (1, f, f as f64, 10.0)).collect();
    v1.push((2, 3, 50.0, 50.0));
    write_mosaic(&dir.join(format!("Traj_{name}_1.tif.csv")), &v1);
}

fn write_series(path: &Path, series: &[f64]) {
    let text: String = series.iter().map(|v| format!("{v}\n")).collect();
    std::fs::write(path, text).unwrap();
}

#[test]
fn videos_are_stacked_and_reduced_to_msds() {
    let dir = tempfile::tempdir().unwrap();
    two_videos(dir.path());

    let stack = msd_iteration(dir.path(), "beads", &unit_options(2)).unwrap();
    assert_eq!(stack.total, 2);
    assert_eq!(stack.frames, 6);
    assert_eq!(stack.particle_ids[1].video, 2);
    assert_eq!(stack.particle_ids[1].particle, 7);
    // Absolute frames keep the gap before frame 2; shifted ones start at 0.
    assert!(stack.y_m.get(1, 1).is_nan());
    assert_relative_eq!(stack.ys_m.get(0, 1), 4.0);

    let out = dir.path().join("out");
    let result = analyze_sample(dir.path(), "beads", &unit_options(2), &out).unwrap();
    assert_relative_eq!(result.sm2xy.get(1, 0), 1.0);
    assert_relative_eq!(result.sm2xy.get(1, 1), 4.0);
    assert_relative_eq!(result.geo_m2xy[1], 2.0, epsilon = 1e-12);
    assert_relative_eq!(result.geo_m2xy[4], 16.0, epsilon = 1e-12);
    assert_eq!(result.counts[4], 1);
    assert!(result.geo_m2xy[5].is_nan());

    let geo = load_series(&out.join("geoM2xy_beads.csv")).unwrap();
    assert_eq!(geo.len(), 6);
    assert_relative_eq!(geo[3], 18.0, epsilon = 1e-9);
    let sm2 = load_matrix(&out.join("SM2xy_beads.csv")).unwrap();
    assert_eq!((sm2.frames(), sm2.particles()), (6, 2));
    assert!(sm2.get(4, 1).is_nan());
}

#[test]
fn missing_video_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    two_videos(dir.path());
    let err = msd_iteration(dir.path(), "beads", &unit_options(3)).unwrap_err();
    assert!(format!("{err:#}").contains("Traj_beads_3.tif.csv"));
}

#[test]
fn histograms_of_saved_msds() {
    let dir = tempfile::tempdir().unwrap();
    two_videos(dir.path());
    analyze_sample(dir.path(), "beads", &unit_options(2), dir.path()).unwrap();

    let options = HistogramOptions {
        frame_range: vec![1, 2],
        bins: 3,
        theta: Theta::Msd,
        analysis: Analysis::Raw,
        width: 300,
        height: 200,
        output_dir: Some(dir.path().join("hist")),
        ..HistogramOptions::default()
    };
    let report = histogram_by_video(&dir.path().join("SM2xy_beads.csv"), &options).unwrap();

    // Frame 1: 1 and 4. Frame 2: 4 and 16. Shared edges 1, 6, 11, 16.
    let edges = &report.histograms[0].histogram.edges;
    assert_relative_eq!(edges[1], 6.0);
    assert_eq!(report.histograms[0].histogram.counts, vec![2, 0, 0]);
    assert_eq!(report.histograms[1].histogram.counts, vec![1, 0, 1]);
    assert!(report.png_path.ends_with("hist/SM2xy_beads_hist.png"));
    assert!(report.csv_path.exists());
}

#[test]
fn gel_replicates_are_averaged_and_plotted() {
    let dir = tempfile::tempdir().unwrap();
    let replicates = [("S1", [0.0, 1.0, 2.0, 3.0, 4.0]), ("S2", [0.0, 3.0, 4.0, 5.0, 6.0])];
    for (rep, series) in &replicates {
        write_series(&dir.path().join(format!("geoM2xy_RED_PEG_agarose_1x_{rep}.csv")), series);
    }
    let grid: GelGrid = serde_json::from_str(
        r#"{
            "channels": ["RED"],
            "surface_functionalities": ["PEG"],
            "media": ["agarose"],
            "concentrations": ["1x"],
            "replicates": ["S1", "S2"]
        }"#,
    )
    .unwrap();
    let template = format!("{}/geoM2xy_{{sample_name}}.csv", dir.path().display());
    let conversion = Conversion {
        frames_per_second: 10.0,
        ..Conversion::default()
    };

    let study = prepare_gel_study(&template, Some(5), &[1, 3], &conversion, &grid).unwrap();
    assert_eq!(study.avg_sets, vec!["RED_PEG_agarose_1x"]);
    assert_eq!(study.averages["RED_PEG_agarose_1x"], vec![0.0, 2.0, 3.0, 4.0, 5.0]);
    assert_relative_eq!(study.sds["RED_PEG_agarose_1x"][0], 1.0);
    assert_relative_eq!(study.time_sd[1], 0.3, epsilon = 1e-12);

    let written = study.save(dir.path()).unwrap();
    let averages = std::fs::read_to_string(&written[0]).unwrap();
    assert!(averages.starts_with("time,RED_PEG_agarose_1x\n"));

    let options = LinePlotOptions {
        to_frame: 5,
        manual_axes: None,
        width: 400,
        height: 300,
        line_width: 3,
        label_identifier: Some("agarose_".to_string()),
        base_name: "gel".to_string(),
    };
    let axes = graph_single_variable(
        &study.averages,
        &study.sds,
        &study.time,
        &study.time_sd,
        &study.sd_frames,
        "RED",
        "PEG",
        &options,
        dir.path(),
    )
    .unwrap();
    assert_eq!(axes.path, dir.path().join("gel_RED_PEG.png"));
    assert_relative_eq!(axes.y.range, 6.0, epsilon = 1e-9);
    assert!(axes.path.exists());
}

#[test]
fn msd_output_is_averaged_without_a_frame_count() {
    let dir = tempfile::tempdir().unwrap();
    for rep in ["S1", "S2"] {
        let name = format!("RED_PEG_gel_1x_{rep}");
        first_video(dir.path(), &name);
        analyze_sample(dir.path(), &name, &unit_options(1), dir.path()).unwrap();
    }
    let grid = GelGrid {
        channels: vec!["RED".to_string()],
        surface_functionalities: vec!["PEG".to_string()],
        media: vec!["gel".to_string()],
        concentrations: vec!["1x".to_string()],
        replicates: vec!["S1".to_string(), "S2".to_string()],
    };
    let template = format!("{}/geoM2xy_{{sample_name}}.csv", dir.path().display());

    // The default 651-frame cap is far above the 5 lags on disk.
    let study = prepare_gel_study(&template, None, &[1, 3], &Conversion::default(), &grid).unwrap();
    let avg = &study.averages["RED_PEG_gel_1x"];
    assert_eq!(avg.len(), 5);
    assert_relative_eq!(avg[2], 4.0, epsilon = 1e-9);
    assert_relative_eq!(avg[4], 16.0, epsilon = 1e-9);
    assert_eq!(study.time.len(), 6);
}

#[test]
fn pup_slices_are_averaged_then_pups() {
    let dir = tempfile::tempdir().unwrap();
    let slices = [
        ("P1_S1", [0.0, 2.0, 4.0]),
        ("P1_S2", [0.0, 4.0, 8.0]),
        ("P2_S1", [0.0, 6.0, 10.0]),
        ("P2_S2", [0.0, 6.0, 14.0]),
    ];
    for (pup_slice, series) in &slices {
        let file = format!("geoM2xy_RED_WT_PEG_cortex_{pup_slice}.csv");
        write_series(&dir.path().join(file), series);
    }
    let grid: PupGrid = serde_json::from_str(
        r#"{
            "channels": ["RED"],
            "genotypes": ["WT"],
            "surface_functionalities": ["PEG"],
            "regions": ["cortex"],
            "pups": ["P1", "P2"],
            "slices": ["S1", "S2"],
            "replicates": ["1", "2"]
        }"#,
    )
    .unwrap();
    let template = format!("{}/geoM2xy_{{sample_name}}.csv", dir.path().display());

    let study = prepare_pup_study(&template, None, &[1, 2], &Conversion::default(), &grid).unwrap();
    assert_eq!(study.avg_over_slices, vec!["RED_WT_PEG_cortex_P1", "RED_WT_PEG_cortex_P2"]);
    assert_eq!(study.avg_over_pups, vec!["RED_WT_PEG_cortex"]);
    assert_eq!(study.names_with_replicates.len(), 8);

    assert_eq!(study.average_over_slices["RED_WT_PEG_cortex_P1"], vec![0.0, 3.0, 6.0]);
    assert_eq!(study.average_over_slices["RED_WT_PEG_cortex_P2"], vec![0.0, 6.0, 12.0]);
    assert_eq!(study.average_over_pups["RED_WT_PEG_cortex"], vec![0.0, 4.5, 9.0]);

    let sd_p1 = &study.sd_over_slices["RED_WT_PEG_cortex_P1"];
    let sd_p2 = &study.sd_over_slices["RED_WT_PEG_cortex_P2"];
    assert_relative_eq!(sd_p1[0], 1.0);
    assert_relative_eq!(sd_p1[1], 2.0);
    assert_relative_eq!(sd_p2[0], 0.0);
    assert_relative_eq!(sd_p2[1], 2.0);
    let sd_region = &study.sd_over_pups["RED_WT_PEG_cortex"];
    assert_relative_eq!(sd_region[0], 1.5);
    assert_relative_eq!(sd_region[1], 3.0);

    let written = study.save(dir.path()).unwrap();
    let sd_table = std::fs::read_to_string(&written[1]).unwrap();
    assert!(sd_table.starts_with("time,RED_WT_PEG_cortex\n"));
}
