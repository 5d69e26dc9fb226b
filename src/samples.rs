//! Experimental designs: which samples exist and where their data lives.
//!
//! A sample name is its experimental factors joined with `_`, for example
//! `RED_PEG_in_agarose_1x_S1`. Groups to average over are the same names with
//! the innermost factors left off, so substring matching on a group name
//! selects its members (see [`crate::data::filter::matching_keys`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::data::loader::load_series;
use crate::error::{DiffusionError, Result};

// ---------------------------------------------------------------------------
// Path templates
// ---------------------------------------------------------------------------

/// Substitute `{key}` placeholders in `template`. `{{` and `}}` produce
/// literal braces.
pub fn render_template<K, V>(template: &str, fields: &BTreeMap<K, V>) -> Result<String>
where
    K: std::borrow::Borrow<str> + Ord,
    V: AsRef<str>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => {
                            let template = template.to_string();
                            return Err(DiffusionError::UnterminatedPlaceholder(template));
                        }
                    }
                }
                let value = fields
                    .get(key.as_str())
                    .ok_or(DiffusionError::UnknownPlaceholder(key))?;
                out.push_str(value.as_ref());
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// One sample of a design: its name and the template fields that locate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub sample_name: String,
    pub fields: BTreeMap<&'static str, String>,
}

impl SampleEntry {
    fn new(parts: &[(&'static str, &str)]) -> Self {
        let sample_name = parts.iter().map(|(_, v)| *v).collect::<Vec<_>>().join("_");
        let mut fields: BTreeMap<&'static str, String> =
            parts.iter().map(|(k, v)| (*k, v.to_string())).collect();
        fields.insert("sample_name", sample_name.clone());
        Self {
            sample_name,
            fields,
        }
    }

    pub fn path(&self, template: &str) -> Result<PathBuf> {
        render_template(template, &self.fields).map(PathBuf::from)
    }
}

fn load_entries(
    entries: &[SampleEntry],
    path_template: &str,
) -> AnyResult<BTreeMap<String, Vec<f64>>> {
    let mut data = BTreeMap::new();
    for entry in entries {
        let path = entry.path(path_template)?;
        let series = load_series(&path)
            .with_context(|| format!("loading sample '{}'", entry.sample_name))?;
        log::debug!("{}: {} values from {}", entry.sample_name, series.len(), path.display());
        data.insert(entry.sample_name.clone(), series);
    }
    log::info!("Loaded {} samples", data.len());
    Ok(data)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

// ---------------------------------------------------------------------------
// Gel experiments
// ---------------------------------------------------------------------------

/// Nanoparticles in gels: channel x surface functionality x medium x
/// concentration, each with several replicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GelGrid {
    pub channels: Vec<String>,
    pub surface_functionalities: Vec<String>,
    pub media: Vec<String>,
    pub concentrations: Vec<String>,
    pub replicates: Vec<String>,
}

/// Loaded gel data.
#[derive(Debug, Clone, PartialEq)]
pub struct GelData {
    /// Sample name → MSD series.
    pub data: BTreeMap<String, Vec<f64>>,
    /// Replicate-free group names, in design order.
    pub avg_sets: Vec<String>,
}

impl GelGrid {
    /// Every sample in design order, with its replicate-free group.
    pub fn entries(&self) -> Vec<(String, SampleEntry)> {
        let mut out = Vec::new();
        for channel in &self.channels {
            for sf in &self.surface_functionalities {
                for medium in &self.media {
                    for conc in &self.concentrations {
                        let group = [channel.as_str(), sf.as_str(), medium.as_str(), conc.as_str()]
                            .join("_");
                        for replicate in &self.replicates {
                            let entry = SampleEntry::new(&[
                                ("channel", channel.as_str()),
                                ("surface_functionality", sf.as_str()),
                                ("medium", medium.as_str()),
                                ("concentration", conc.as_str()),
                                ("replicate", replicate.as_str()),
                            ]);
                            out.push((group.clone(), entry));
                        }
                    }
                }
            }
        }
        out
    }

    pub fn avg_sets(&self) -> Vec<String> {
        let mut sets = Vec::new();
        for (group, _) in self.entries() {
            push_unique(&mut sets, group);
        }
        sets
    }

    /// Read every sample's series. `path_template` may use `{channel}`,
    /// `{surface_functionality}`, `{medium}`, `{concentration}`,
    /// `{replicate}` and `{sample_name}`.
    pub fn load(&self, path_template: &str) -> AnyResult<GelData> {
        let entries: Vec<SampleEntry> = self.entries().into_iter().map(|(_, e)| e).collect();
        Ok(GelData {
            data: load_entries(&entries, path_template)?,
            avg_sets: self.avg_sets(),
        })
    }

    pub fn from_json_file(path: &Path) -> AnyResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading sample grid {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing sample grid {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Brain slice experiments
// ---------------------------------------------------------------------------

/// Nanoparticles in brain slices: channel x genotype x surface functionality
/// x region x pup x slice. Replicates (videos) are already merged in each
/// slice's file and only appear in `names_with_replicates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PupGrid {
    pub channels: Vec<String>,
    pub genotypes: Vec<String>,
    pub pups: Vec<String>,
    pub surface_functionalities: Vec<String>,
    pub slices: Vec<String>,
    pub regions: Vec<String>,
    pub replicates: Vec<String>,
}

/// Loaded slice data with its averaging groups.
#[derive(Debug, Clone, PartialEq)]
pub struct PupData {
    pub data: BTreeMap<String, Vec<f64>>,
    /// `channel_genotype_sf_region_pup`: groups whose slices are averaged.
    pub avg_over_slices: Vec<String>,
    /// `channel_genotype_sf_region`: groups whose pups are averaged.
    pub avg_over_pups: Vec<String>,
    /// Every slice name with each replicate appended.
    pub names_with_replicates: Vec<String>,
}

impl PupGrid {
    pub fn entries(&self) -> Vec<SampleEntry> {
        let mut out = Vec::new();
        for channel in &self.channels {
            for genotype in &self.genotypes {
                for sf in &self.surface_functionalities {
                    for region in &self.regions {
                        for pup in &self.pups {
                            for slice in &self.slices {
                                out.push(SampleEntry::new(&[
                                    ("channel", channel.as_str()),
                                    ("genotype", genotype.as_str()),
                                    ("surface_functionality", sf.as_str()),
                                    ("region", region.as_str()),
                                    ("pup", pup.as_str()),
                                    ("slice", slice.as_str()),
                                ]));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Group names and replicate names without touching the file system.
    pub fn groups(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        let mut over_slices = Vec::new();
        let mut over_pups = Vec::new();
        let mut with_replicates = Vec::new();
        for entry in self.entries() {
            let f = &entry.fields;
            let by_pup = ["channel", "genotype", "surface_functionality", "region", "pup"]
                .iter()
                .map(|k| f[*k].as_str())
                .collect::<Vec<_>>()
                .join("_");
            let by_region = ["channel", "genotype", "surface_functionality", "region"]
                .iter()
                .map(|k| f[*k].as_str())
                .collect::<Vec<_>>()
                .join("_");
            push_unique(&mut over_slices, by_pup);
            push_unique(&mut over_pups, by_region);
            for replicate in &self.replicates {
                with_replicates.push(format!("{}_{replicate}", entry.sample_name));
            }
        }
        (over_slices, over_pups, with_replicates)
    }

    /// Read every slice's series. `path_template` may use `{channel}`,
    /// `{genotype}`, `{surface_functionality}`, `{region}`, `{pup}`, `{slice}`
    /// and `{sample_name}`.
    pub fn load(&self, path_template: &str) -> AnyResult<PupData> {
        let data = load_entries(&self.entries(), path_template)?;
        let (avg_over_slices, avg_over_pups, names_with_replicates) = self.groups();
        Ok(PupData {
            data,
            avg_over_slices,
            avg_over_pups,
            names_with_replicates,
        })
    }

    pub fn from_json_file(path: &Path) -> AnyResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading sample grid {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing sample grid {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn template_substitution() {
        let fields = BTreeMap::from([("concentration", "1x"), ("sample_name", "RED_1x_S1")]);
        assert_eq!(
            render_template("./{concentration}_ACSF/geoM2xy_{sample_name}.csv", &fields).unwrap(),
            "./1x_ACSF/geoM2xy_RED_1x_S1.csv"
        );
        assert_eq!(render_template("{{literal}}", &fields).unwrap(), "{literal}");
    }

    #[test]
    fn template_errors() {
        let fields: BTreeMap<&str, &str> = BTreeMap::new();
        assert_eq!(
            render_template("a_{pup}.csv", &fields).unwrap_err(),
            DiffusionError::UnknownPlaceholder("pup".to_string())
        );
        assert!(matches!(
            render_template("a_{pup", &fields).unwrap_err(),
            DiffusionError::UnterminatedPlaceholder(_)
        ));
    }

    #[test]
    fn gel_names_follow_design_order() {
        let grid = GelGrid {
            channels: strings(&["RED"]),
            surface_functionalities: strings(&["PEG", "nPEG"]),
            media: strings(&["in_agarose"]),
            concentrations: strings(&["1x"]),
            replicates: strings(&["S1", "S2"]),
        };
        let names: Vec<String> = grid.entries().into_iter().map(|(_, e)| e.sample_name).collect();
        assert_eq!(
            names,
            strings(&[
                "RED_PEG_in_agarose_1x_S1",
                "RED_PEG_in_agarose_1x_S2",
                "RED_nPEG_in_agarose_1x_S1",
                "RED_nPEG_in_agarose_1x_S2",
            ])
        );
        assert_eq!(
            grid.avg_sets(),
            strings(&["RED_PEG_in_agarose_1x", "RED_nPEG_in_agarose_1x"])
        );
    }

    #[test]
    fn pup_groups_are_deduplicated() {
        let grid = PupGrid {
            channels: strings(&["RED"]),
            genotypes: strings(&["WT"]),
            pups: strings(&["P1", "P2"]),
            surface_functionalities: strings(&["PEG"]),
            slices: strings(&["S1", "S2"]),
            regions: strings(&["cortex"]),
            replicates: strings(&["1", "2", "3"]),
        };
        assert_eq!(grid.entries()[1].sample_name, "RED_WT_PEG_cortex_P1_S2");
        let (slices, pups, reps) = grid.groups();
        assert_eq!(slices, strings(&["RED_WT_PEG_cortex_P1", "RED_WT_PEG_cortex_P2"]));
        assert_eq!(pups, strings(&["RED_WT_PEG_cortex"]));
        assert_eq!(reps.len(), 12);
        assert_eq!(reps[0], "RED_WT_PEG_cortex_P1_S1_1");
    }

    #[test]
    fn entry_paths_use_all_fields() {
        let grid = PupGrid {
            channels: strings(&["YG"]),
            genotypes: strings(&["KO"]),
            pups: strings(&["P3"]),
            surface_functionalities: strings(&["PEG"]),
            slices: strings(&["S2"]),
            regions: strings(&["mid"]),
            replicates: Vec::new(),
        };
        let entry = &grid.entries()[0];
        assert_eq!(
            entry.path("./{genotype}/{pup}/{region}/{channel}/geoM2xy_{sample_name}.csv").unwrap(),
            PathBuf::from("./KO/P3/mid/YG/geoM2xy_YG_KO_PEG_mid_P3_S2.csv")
        );
    }

    #[test]
    fn gel_load_reads_each_sample() {
        let dir = tempfile::tempdir().unwrap();
        let grid = GelGrid {
            channels: strings(&["RED"]),
            surface_functionalities: strings(&["PEG"]),
            media: strings(&["gel"]),
            concentrations: strings(&["1x"]),
            replicates: strings(&["S1", "S2"]),
        };
        std::fs::write(dir.path().join("geoM2xy_RED_PEG_gel_1x_S1.csv"), "0\n1\n2\n").unwrap();
        std::fs::write(dir.path().join("geoM2xy_RED_PEG_gel_1x_S2.csv"), "0\n3\n4\n").unwrap();
        let template = format!("{}/geoM2xy_{{sample_name}}.csv", dir.path().display());

        let loaded = grid.load(&template).unwrap();
        assert_eq!(loaded.data["RED_PEG_gel_1x_S2"], vec![0.0, 3.0, 4.0]);
        assert_eq!(loaded.avg_sets, strings(&["RED_PEG_gel_1x"]));
    }

    #[test]
    fn missing_sample_file_names_the_sample() {
        let grid = GelGrid {
            channels: strings(&["RED"]),
            surface_functionalities: strings(&["PEG"]),
            media: strings(&["gel"]),
            concentrations: strings(&["1x"]),
            replicates: strings(&["S9"]),
        };
        let err = grid.load("/nonexistent/{sample_name}.csv").unwrap_err();
        assert!(format!("{err:#}").contains("RED_PEG_gel_1x_S9"));
    }
}
