use std::path::PathBuf;

use proptest::prelude::*;

use opmerge_recon::classify::{format_value, parse_number};
use opmerge_recon::config::EngineConfig;
use opmerge_recon::engine::{merge, unmerge, RawFile};
use opmerge_recon::model::AggregationPolicy;
use opmerge_recon::{verify_round_trip, MergeOutput, MergeStamp, ReconstructMode};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn split(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(|l| l.split(';').map(str::to_string).collect())
        .collect()
}

fn load(name: &str) -> RawFile {
    let path = fixtures_dir().join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    RawFile {
        file_name: name.to_string(),
        lines: split(&text),
    }
}

fn stamp() -> MergeStamp {
    MergeStamp {
        timestamp: "20260114_0930".into(),
        created_at: "2026-01-14T09:30:00.123456".into(),
    }
}

fn merge_fixtures(names: &[&str]) -> MergeOutput {
    let files = names.iter().map(|n| load(n)).collect();
    merge(&EngineConfig::default(), files, stamp()).unwrap()
}

/// Numeric cells in output form, so `12,5` and `12.5`, or `50` and `0050`,
/// compare equal.
fn canonical(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            r.iter()
                .map(|c| match parse_number(c).as_number() {
                    Some(v) => format_value(v),
                    None => c.clone(),
                })
                .collect()
        })
        .collect();
    rows.sort();
    rows
}

fn row_by_text<'a>(rows: &'a [Vec<String>], text: &str) -> Vec<&'a Vec<String>> {
    rows.iter().filter(|r| r[2] == text).collect()
}

// -------------------------------------------------------------------------
// Merge
// -------------------------------------------------------------------------

#[test]
fn three_way_merge_aggregates() {
    let out = merge_fixtures(&["1000001.csv", "1000002.csv", "1000003.csv"]);
    let rows = &out.merged.table.rows;
    assert_eq!(out.merged.file_name, "1000001.csv");
    assert_eq!(rows.len(), 6);

    assert_eq!(row_by_text(rows, "Ruesten")[0][5], "30");
    // V0950 aggregates by max
    assert_eq!(row_by_text(rows, "Pruefen")[0][5], "30");
    assert_eq!(row_by_text(rows, "Bearbeiten")[0][5], "3.5");
    assert_eq!(row_by_text(rows, "Entgraten").len(), 2);

    let policies: Vec<_> = out
        .sidecar
        .entries
        .values()
        .filter_map(|e| e.policy)
        .collect();
    assert_eq!(policies.iter().filter(|p| **p == AggregationPolicy::Max).count(), 1);
    assert_eq!(policies.len(), 3);
}

#[test]
fn two_source_sum_and_presence() {
    let out = merge_fixtures(&["1000001.csv", "1000002.csv"]);
    let ruesten = row_by_text(&out.merged.table.rows, "Ruesten")[0].clone();
    assert_eq!(ruesten[5], "25");
    assert_eq!(ruesten[6], "1000001_MAT-4711_SN001_20260114_0930");
    assert_eq!(ruesten[7], "1000002_MAT-4711_SN002_20260114_0930");
    assert_eq!(ruesten[8], "");

    let entry = out
        .sidecar
        .entries
        .iter()
        .find(|(k, _)| k.as_str().contains("RUESTEN"))
        .map(|(_, e)| e)
        .unwrap();
    assert_eq!(entry.present_slots().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(entry.raw_values.get(&0), Some(&10.0));
    assert_eq!(entry.raw_values.get(&1), Some(&15.0));
}

#[test]
fn merged_header_and_metadata_shape() {
    let out = merge_fixtures(&["1000001.csv", "1000002.csv"]);
    let header = &out.merged.table.header;
    assert_eq!(header.len(), 12);
    assert_eq!(header[6], "Fertigungsauftrag_1");
    assert_eq!(header[9], "OriginalSAP_Fertigungsauftrag_1");
    assert!(out.merged.table.metadata.iter().all(|l| l.len() == 12));
    assert_eq!(out.merged.table.metadata[0][1], "1000001");
    assert_eq!(out.sidecar.manifest.structural_prefix_len, 6);
}

// -------------------------------------------------------------------------
// Reconstruct
// -------------------------------------------------------------------------

fn reconstructed(out: &MergeOutput) -> opmerge_recon::ReconstructOutput {
    let file = RawFile {
        file_name: out.merged.file_name.clone(),
        lines: out.merged.table.to_lines(),
    };
    unmerge(
        &EngineConfig::default(),
        file,
        Some(&out.sidecar),
        ReconstructMode::Sidecar,
    )
    .unwrap()
}

#[test]
fn fixtures_round_trip() {
    let names = ["1000001.csv", "1000002.csv", "1000003.csv"];
    let out = merge_fixtures(&names);
    assert!(verify_round_trip(&out.merged, &out.sidecar).unwrap().is_empty());

    let back = reconstructed(&out);
    assert!(back.diagnostics.is_empty(), "{:?}", back.diagnostics);
    assert_eq!(back.tables.len(), 3);

    for (slot, name) in names.iter().enumerate() {
        let original = load(name);
        let table = &back.tables[slot].table;
        assert_eq!(table.metadata, original.lines[..4].to_vec(), "{name} metadata");
        assert_eq!(table.header, original.lines[4], "{name} header");
        assert_eq!(canonical(&table.rows), canonical(&original.lines[5..]), "{name} rows");
    }
}

#[test]
fn operation_number_padded() {
    let out = merge_fixtures(&["1000001.csv", "1000002.csv"]);
    let back = reconstructed(&out);
    let first = &back.tables[0].table.rows;
    assert_eq!(row_by_text(first, "Ruesten")[0][0], "0050");
    // second source kept its own operation number
    let second = &back.tables[1].table.rows;
    assert_eq!(row_by_text(second, "Ruesten")[0][0], "0010");
}

#[test]
fn key_in_one_source_yields_one_table() {
    let out = merge_fixtures(&["1000002.csv", "1000003.csv"]);
    let waschen = row_by_text(&out.merged.table.rows, "Waschen")[0].clone();
    assert_ne!(waschen[6], "");
    assert_eq!(waschen[7], "");
    assert_eq!(waschen[8], "");

    let back = reconstructed(&out);
    let holders: Vec<usize> = back
        .tables
        .iter()
        .filter(|t| !row_by_text(&t.table.rows, "Waschen").is_empty())
        .map(|t| t.slot)
        .collect();
    assert_eq!(holders, vec![0]);
}

#[test]
fn names_come_from_manifest() {
    let out = merge_fixtures(&["1000001.csv", "1000003.csv"]);
    let back = reconstructed(&out);
    let names: Vec<&str> = back.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "1000001_MAT-4711_SN001_20260114_0930",
            "1000003_MAT-4711_SN003_20260114_0930"
        ]
    );
}

// -------------------------------------------------------------------------
// Property
// -------------------------------------------------------------------------

const TEXTS: [&str; 5] = ["Ruesten", "Bohren", "Pruefen V0950", "Entgraten", "Messen V0120"];

fn arb_row() -> impl Strategy<Value = Vec<String>> {
    (1u32..10, 0usize..TEXTS.len(), any::<bool>(), 0u32..4000).prop_map(
        |(op, text, timed, quarters)| {
            vec![
                format!("{}", op * 10),
                if timed { "Zeitanteil" } else { "Normal" }.to_string(),
                TEXTS[text].to_string(),
                "min".to_string(),
                format_value(quarters as f64 / 4.0),
            ]
        },
    )
}

fn arb_source(order: u32) -> impl Strategy<Value = RawFile> {
    prop::collection::vec(arb_row(), 1..6).prop_map(move |rows| {
        let mut lines = vec![
            vec!["Fertigungsauftrag".to_string(), order.to_string()],
            vec!["Material-Id".to_string(), "M".to_string()],
            vec!["MSN".to_string(), format!("S{order}")],
            vec!["Arbeitsplan".to_string(), "AP".to_string()],
            ["SAP-Arbeitsvorgang", "Art", "Text", "Einheit", "Wert"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ];
        lines.extend(rows);
        RawFile {
            file_name: format!("{order}.csv"),
            lines,
        }
    })
}

proptest! {
    #[test]
    fn merge_then_reconstruct_restores_sources(
        a in arb_source(1),
        b in arb_source(2),
        c in arb_source(3),
        count in 1usize..=3,
    ) {
        let sources: Vec<RawFile> = vec![a, b, c].into_iter().take(count).collect();
        let out = merge(&EngineConfig::default(), sources.clone(), stamp()).unwrap();
        prop_assert!(verify_round_trip(&out.merged, &out.sidecar).unwrap().is_empty());

        let back = reconstructed(&out);
        prop_assert!(back.diagnostics.is_empty());
        prop_assert_eq!(back.tables.len(), sources.len());

        for (slot, source) in sources.iter().enumerate() {
            let table = &back.tables[slot];
            prop_assert_eq!(table.slot, slot);
            prop_assert_eq!(canonical(&table.table.rows), canonical(&source.lines[5..]));
        }
    }
}
