use grantlink::checkpoint::{Checkpoint, Stage, write_publication_table};
use grantlink::corpus::Corpus;
use grantlink::scan::CorpusScanner;
use grantlink::score::{CorpusBodies, ScoringConfig, SimilarityScorer};
use grantlink::seeds::{SeedTableReader, resolve_seed_records};
use grantlink::{GrantError, GrantIndex, JatsExtractor};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn article(authors: &[(&str, &str)], title: &str, body: &str) -> String {
    let contribs: String = authors
        .iter()
        .map(|(surname, given)| {
            format!(
                "<contrib contrib-type=\"author\"><name><surname>{surname}</surname>\
                 <given-names>{given}</given-names></name></contrib>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?>\n<article><front>\
         <journal-meta><journal-title>Cancer Research</journal-title></journal-meta>\
         <article-meta><title-group><article-title>{title}</article-title></title-group>\
         <contrib-group>{contribs}</contrib-group></article-meta></front>\
         <body><sec><p>{body}</p></sec></body></article>"
    )
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Two seeds of G1, a related candidate, an unrelated candidate by a seed author, and a
/// stranger whose text copies a seed.
fn build_corpus(root: &Path) {
    write(
        root,
        "articles.A-B/Cancer_Res/seed1.nxml",
        &article(&[("Smith", "John")], "Seed one", "cancer treatment trial results"),
    );
    write(
        root,
        "articles.A-B/Cancer_Res/seed2.nxml",
        &article(&[("Doe", "Jane")], "Seed two", "tumor therapy clinical trial"),
    );
    write(
        root,
        "articles.C-H/Cell/related.nxml",
        &article(
            &[("Smith", "John"), ("Roe", "Richard")],
            "Related",
            "cancer treatment outcomes study",
        ),
    );
    write(
        root,
        "articles.C-H/Cell/unrelated.nxml",
        &article(&[("Doe", "Jane")], "Unrelated", "galaxy survey of distant quasars"),
    );
    write(
        root,
        "articles.C-H/Cell/copycat.nxml",
        &article(&[("Stranger", "Sam")], "Copy", "cancer treatment trial results"),
    );
    write(root, "articles.C-H/Cell/#contents#", "");
}

const SEED_TABLE: &str = "folder,subfolder,filename,title,journal,grant,citation\n\
    articles.A-B,Cancer_Res,seed1.nxml,Seed one,cancer research,G1,\n\
    articles.A-B,Cancer_Res,seed2.nxml,Seed two,cancer research,G1,\n";

fn folders() -> Vec<String> {
    vec!["articles.A-B".to_string(), "articles.C-H".to_string()]
}

fn seeded_index(corpus: &Corpus, table: &str) -> grantlink::Result<GrantIndex> {
    let rows = SeedTableReader::new().read(table)?;
    let records = resolve_seed_records(rows, corpus, &JatsExtractor::new());
    let mut index = GrantIndex::new();
    index.load_seeds(records)?;
    Ok(index)
}

fn filenames(index: &GrantIndex, grant_id: &str) -> Vec<String> {
    let mut names: Vec<_> = index
        .get(grant_id)
        .unwrap()
        .publications()
        .iter()
        .map(|p| p.location.filename().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_seed_scan_score_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let corpus = Corpus::open(dir.path(), &folders()).unwrap();

    let mut index = seeded_index(&corpus, SEED_TABLE).unwrap();
    assert_eq!(index.find_grants_by_author("Smith, John").len(), 1);
    let seeded = dir.path().join("seeded.json");
    Checkpoint::new(Stage::Seeded, &index).save(&seeded).unwrap();

    let report = CorpusScanner::new(JatsExtractor::new())
        .with_workers(Some(2))
        .scan(&corpus, &mut index)
        .unwrap();
    assert_eq!(report.scanned, 5);
    assert_eq!(report.skipped_sentinel, 1);
    assert_eq!(report.matched, 4);
    assert_eq!(
        filenames(&index, "G1"),
        vec!["related.nxml", "seed1.nxml", "seed2.nxml", "unrelated.nxml"]
    );

    let scanned = dir.path().join("scanned.json");
    Checkpoint::scanned(&index, &report).unwrap().save(&scanned).unwrap();
    let checkpoint = Checkpoint::load(&scanned).unwrap();
    checkpoint.expect_stage(&[Stage::Scanned]).unwrap();
    let index = checkpoint.into_index();

    let bodies = CorpusBodies::new(&corpus, JatsExtractor::new());
    let mut retained = Vec::new();
    for threshold in [1.0, 0.8, 0.6, 0.4, 0.2, 0.0] {
        let scorer = SimilarityScorer::new(ScoringConfig {
            threshold,
            ..Default::default()
        })
        .unwrap();
        let (scored, report) = scorer.score_index(index.clone(), &bodies).unwrap();
        assert_eq!(report.grants_degenerate, 0);

        let grant = scored.get("G1").unwrap();
        assert_eq!(grant.seeds().count(), 2);
        assert!(
            grant
                .publications()
                .iter()
                .all(|p| p.location.filename() != "copycat.nxml")
        );
        retained.push(grant.candidates().count());
    }
    assert!(retained.windows(2).all(|w| w[0] <= w[1]), "{retained:?}");
    assert_eq!(retained.last(), Some(&2));

    let (scored, _) = SimilarityScorer::new(ScoringConfig {
        threshold: 0.1,
        ..Default::default()
    })
    .unwrap()
    .score_index(index, &bodies)
    .unwrap();
    assert!(filenames(&scored, "G1").contains(&"related.nxml".to_string()));

    let mut table = Vec::new();
    let rows = write_publication_table(&mut table, &scored).unwrap();
    assert_eq!(rows, scored.get("G1").unwrap().publications().len());
}

#[test]
fn test_malformed_seed_table_leaves_no_index() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let corpus = Corpus::open(dir.path(), &folders()).unwrap();

    let table = "folder,subfolder,filename,title,journal,grant,citation\n\
        articles.A-B,Cancer_Res,seed1.nxml,Seed one,cancer research,G1,\n\
        articles.A-B,Cancer_Res,seed2.nxml,Seed two,cancer research,,\n";
    let result = seeded_index(&corpus, table);
    assert!(matches!(
        result,
        Err(GrantError::MalformedSeed { line: 3, .. })
    ));
}

#[test]
fn test_unreadable_corpus_root() {
    let dir = tempfile::tempdir().unwrap();
    let result = Corpus::open(dir.path().join("absent"), &folders());
    assert!(matches!(result, Err(GrantError::CorpusRoot { .. })));
}

#[test]
fn test_cancelled_scan_writes_no_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let corpus = Corpus::open(dir.path(), &folders()).unwrap();
    let mut index = seeded_index(&corpus, SEED_TABLE).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = CorpusScanner::new(JatsExtractor::new())
        .with_cancellation(cancel)
        .scan(&corpus, &mut index)
        .unwrap();
    assert!(report.interrupted);

    let scanned = dir.path().join("scanned.json");
    let result = Checkpoint::scanned(&index, &report).and_then(|c| c.save(&scanned));
    assert!(matches!(result, Err(GrantError::Interrupted(_))));
    assert!(!scanned.exists());
}
