use rqc_core::{tidy_label, PhaseDefinition};

use crate::doc::{CheckDoc, LayerDoc, TemplateDoc};

/// Builds a linear template from the bare layer/check names of a definition:
/// layer `n` depends on layer `n-1`, every layer gets every configured check
/// (or one placeholder check), and all checks accept the default types.
pub fn synthesize(definition: &PhaseDefinition, placeholder_check: &str, default_types: &[String]) -> TemplateDoc {
    let mut layer_names: Vec<String> = definition
        .layers
        .iter()
        .map(|l| tidy_label(l))
        .filter(|l| !l.is_empty())
        .collect();
    if layer_names.is_empty() {
        layer_names.push(tidy_label(&definition.name));
    }

    let mut check_names: Vec<String> = vec![];
    for check in definition.checks.iter().map(|c| tidy_label(c)) {
        if !check.is_empty() && !check_names.contains(&check) {
            check_names.push(check);
        }
    }
    if check_names.is_empty() {
        check_names.push(tidy_label(placeholder_check));
    }

    let layers = layer_names
        .iter()
        .enumerate()
        .map(|(idx, name)| LayerDoc {
            id: Some(format!("layer-{}", idx + 1)),
            name: name.clone(),
            aliases: vec![],
            stage: Some(idx as u32 + 1),
            depends_on: if idx == 0 { vec![] } else { vec![format!("layer-{idx}")] },
            checks: check_names
                .iter()
                .map(|c| CheckDoc {
                    name: c.clone(),
                    ..Default::default()
                })
                .collect(),
        })
        .collect();

    TemplateDoc {
        name: Some(definition.name.clone()),
        aliases: vec![],
        default_types: default_types.to_vec(),
        layers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateSource;
    use rqc_core::{LayerId, Measure, PhaseDefinitionId};

    fn definition(layers: &[&str], checks: &[&str]) -> PhaseDefinition {
        PhaseDefinition {
            id: PhaseDefinitionId::from_str("pd-1"),
            name: "Culvert".into(),
            measure: Measure::Linear,
            point_has_sides: false,
            layers: layers.iter().map(|s| s.to_string()).collect(),
            checks: checks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn chains_layers_in_order() {
        let doc = synthesize(&definition(&["Bedding", "Pipe", "Backfill"], &["Placement", "Survey"]), "Sign-off", &["on-site inspection".into()]);
        let t = doc.normalize(&PhaseDefinitionId::from_str("pd-1"), TemplateSource::Synthesized, &[]).unwrap();
        let layers = t.layers();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[2].stage, 3);
        assert!(layers[0].dependencies.is_empty());
        assert_eq!(layers[2].dependencies.iter().collect::<Vec<_>>(), vec![&LayerId::from_str("layer-2")]);
        assert_eq!(layers[1].checks.len(), 2);
        assert!(layers[1].checks[0].allowed_types.contains("on-site inspection"));
    }

    #[test]
    fn placeholder_check_and_single_layer() {
        let doc = synthesize(&definition(&[], &[]), "Sign-off", &["on-site inspection".into()]);
        assert_eq!(doc.layers.len(), 1);
        assert_eq!(doc.layers[0].name, "Culvert");
        assert_eq!(doc.layers[0].checks[0].name, "Sign-off");
    }
}
