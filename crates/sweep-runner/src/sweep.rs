//! Sweep declaration and combination generation.
//!
//! A [`SweepSpec`] is an ordered list of parameter axes, each mapping a
//! key to the value-tuples to try for it. [`SweepSpec::combinations`]
//! expands the Cartesian product depth-first (earliest axis varies
//! slowest) into immutable [`Combination`] values. The generator is pure
//! and re-enumerable: enumerating twice yields identical output, and
//! submission happens elsewhere.
//!
//! Results are aggregated by [`CombinationKey`], the ordered tuple of raw
//! values. The display tag is derived separately and is lossy by design:
//! sanitization can collapse distinct raw values, so it must never be
//! used as an aggregation key.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use restart_kernel::{JobSpec, ParamBlock, Section, SectionContent};

/// Where a sweep key lands in the job spec. Declared up front instead of
/// probed at submission time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisTarget {
    /// Replace (or insert) a top-level table section of the same name
    Section,
    /// Set the key inside the nested parameter block
    #[default]
    Params,
}

/// One parameter axis: a key, its target location, and the ordered list
/// of value-tuples to try. Each tuple fills one occurrence of the key
/// (e.g. a 3-component field vector is one tuple of three tokens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepAxis {
    pub key: String,
    #[serde(default)]
    pub target: AxisTarget,
    pub values: Vec<Vec<String>>,
}

/// A declarative parameter sweep. Immutable once supplied; axis order and
/// per-axis value order are the caller's and are preserved throughout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSpec {
    pub axes: Vec<SweepAxis>,
}

impl SweepSpec {
    /// Load a sweep from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Expand the Cartesian product of all axes, earliest axis varying
    /// slowest. Pure and side-effect free; re-enumeration yields the same
    /// sequence.
    pub fn combinations(&self) -> Vec<Combination> {
        let mut out = Vec::new();
        let mut current = Vec::new();
        expand(&self.axes, &mut current, &mut out);
        out
    }
}

fn expand(axes: &[SweepAxis], current: &mut Vec<AxisChoice>, out: &mut Vec<Combination>) {
    let Some((axis, rest)) = axes.split_first() else {
        out.push(Combination {
            index: out.len(),
            choices: current.clone(),
        });
        return;
    };
    for value in &axis.values {
        current.push(AxisChoice {
            key: axis.key.clone(),
            target: axis.target,
            value: value.clone(),
        });
        expand(rest, current, out);
        current.pop();
    }
}

/// One resolved axis value within a combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisChoice {
    pub key: String,
    pub target: AxisTarget,
    pub value: Vec<String>,
}

/// One fully-resolved choice of a value-tuple for every axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    /// Position in generation order
    pub index: usize,
    /// One choice per axis, in axis order
    pub choices: Vec<AxisChoice>,
}

impl Combination {
    /// The structural aggregation key: the ordered tuple of raw value
    /// tuples. Unlike the tag, distinct combinations always have
    /// distinct keys.
    pub fn key(&self) -> CombinationKey {
        CombinationKey(self.choices.iter().map(|c| c.value.clone()).collect())
    }

    /// The display tag: `<key>_<first component>_` per axis, with every
    /// character outside `[A-Za-z0-9_]` replaced by `_`. Lossy; distinct
    /// raw values can collapse to the same tag.
    pub fn tag(&self) -> String {
        let mut raw = String::new();
        for choice in &self.choices {
            raw.push_str(&choice.key);
            raw.push('_');
            raw.push_str(choice.value.first().map(String::as_str).unwrap_or(""));
            raw.push('_');
        }
        sanitize_tag(&raw)
    }

    /// Apply this combination to a job template, producing the spec to
    /// submit. Section targets replace a top-level table section with a
    /// single row holding the value tuple; Params targets set the key in
    /// the parameter block. The template is left untouched.
    pub fn apply_to(&self, template: &JobSpec) -> JobSpec {
        let mut spec = template.clone();
        for choice in &self.choices {
            match choice.target {
                AxisTarget::Section => {
                    spec.replace_section(
                        choice.key.clone(),
                        SectionContent::Table(vec![choice.value.clone()]),
                    );
                }
                AxisTarget::Params => {
                    match spec.params_mut() {
                        Some(params) => params.set(choice.key.clone(), choice.value.clone()),
                        None => {
                            let mut params = ParamBlock::new();
                            params.set(choice.key.clone(), choice.value.clone());
                            spec.sections.push(Section {
                                name: "params".to_string(),
                                content: SectionContent::Params(params),
                            });
                        }
                    }
                }
            }
        }
        spec
    }
}

/// Ordered tuple of raw value tuples; the aggregation key for sweep
/// results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombinationKey(pub Vec<Vec<String>>);

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_tag(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Display tags that more than one combination maps to, in first-seen
/// order.
pub fn duplicate_tags(combinations: &[Combination]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order = Vec::new();
    for combo in combinations {
        let tag = combo.tag();
        let count = counts.entry(tag.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(tag);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(key: &str, values: &[&[&str]]) -> SweepAxis {
        SweepAxis {
            key: key.to_string(),
            target: AxisTarget::Params,
            values: values
                .iter()
                .map(|v| v.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_two_axis_expansion_and_tags() {
        let sweep = SweepSpec {
            axes: vec![
                axis("temp", &[&["10"], &["50"]]),
                axis("hfield", &[&["0", "0", "10"]]),
            ],
        };
        let combos = sweep.combinations();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].tag(), "temp_10_hfield_0_");
        assert_eq!(combos[1].tag(), "temp_50_hfield_0_");
    }

    #[test]
    fn test_earliest_axis_varies_slowest() {
        let sweep = SweepSpec {
            axes: vec![
                axis("a", &[&["1"], &["2"]]),
                axis("b", &[&["x"], &["y"]]),
            ],
        };
        let tags: Vec<String> = sweep.combinations().iter().map(|c| c.tag()).collect();
        assert_eq!(tags, vec!["a_1_b_x_", "a_1_b_y_", "a_2_b_x_", "a_2_b_y_"]);
    }

    #[test]
    fn test_re_enumeration_is_identical() {
        let sweep = SweepSpec {
            axes: vec![
                axis("temp", &[&["10"], &["50"], &["100"]]),
                axis("ncell", &[&["50", "50", "1"], &["120", "120", "1"]]),
            ],
        };
        assert_eq!(sweep.combinations(), sweep.combinations());
    }

    #[test]
    fn test_tag_sanitization_is_lossy_and_flagged() {
        let sweep = SweepSpec {
            axes: vec![axis("mode", &[&["a.b"], &["a/b"]])],
        };
        let combos = sweep.combinations();
        assert_eq!(combos[0].tag(), "mode_a_b_");
        assert_eq!(combos[0].tag(), combos[1].tag());
        // distinct raw values keep distinct structural keys
        assert_ne!(combos[0].key(), combos[1].key());
        assert_eq!(duplicate_tags(&combos), vec!["mode_a_b_".to_string()]);
    }

    #[test]
    fn test_apply_targets_params_and_sections() {
        let mut template = JobSpec::new("sweep", "apply test");
        template
            .params_mut()
            .unwrap()
            .set("temp", vec!["300".to_string()]);

        let sweep = SweepSpec {
            axes: vec![
                axis("temp", &[&["10"]]),
                SweepAxis {
                    key: "ncell".to_string(),
                    target: AxisTarget::Section,
                    values: vec![vec!["50".into(), "50".into(), "1".into()]],
                },
            ],
        };
        let combos = sweep.combinations();
        let spec = combos[0].apply_to(&template);

        assert_eq!(spec.params().unwrap().first_token("temp"), Some("10"));
        let section = spec.section("ncell").unwrap();
        assert_eq!(
            section.content,
            SectionContent::Table(vec![vec![
                "50".to_string(),
                "50".to_string(),
                "1".to_string()
            ]])
        );
        // template untouched
        assert_eq!(template.params().unwrap().first_token("temp"), Some("300"));
    }
}
