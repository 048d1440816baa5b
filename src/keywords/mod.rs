// Keyword Extractor: top terms per (date, source, media_type) partition.
//
// Each partition gets its own term/document matrix over filtered lemmas.
// Terms present in more than `max_df_ratio` of the partition's documents
// (lemma-less ones included) are dropped, the survivors are weighted by TF-IDF summed over documents, and the
// top `top_n` are kept. Ties fall back to document frequency (higher first)
// and then the term itself, so ranks are stable across runs.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::corpus::{partition_documents, CleanedDocument, CorpusReader, LemmaFilter, Partition};
use crate::db::models::DailyKeyword;
use crate::db::Database;
use crate::error::{StageError, StageReport};
use crate::text::TermDocumentMatrix;

#[derive(Debug, Clone)]
pub struct KeywordConfig {
    pub top_n: usize,
    pub max_df_ratio: f64,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            max_df_ratio: 0.40,
        }
    }
}

/// Rank the keywords of one partition.
pub fn extract_keywords(
    partition: &Partition,
    docs: &[&CleanedDocument],
    filter: &LemmaFilter,
    config: &KeywordConfig,
) -> Result<Vec<DailyKeyword>, StageError> {
    if docs.is_empty() {
        return Err(StageError::insufficient(partition, "no documents"));
    }

    let matrix = TermDocumentMatrix::from_documents(docs, filter);
    if matrix.is_empty() {
        return Err(StageError::insufficient(
            partition,
            format!("{} documents but no valid lemmas", docs.len()),
        ));
    }

    let matrix = matrix.with_max_df(config.max_df_ratio, docs.len());
    if matrix.is_empty() {
        return Err(StageError::insufficient(
            partition,
            "every term is above the document-frequency ceiling",
        ));
    }

    let weights = matrix.term_weights();
    let mut order: Vec<usize> = (0..matrix.n_terms()).collect();
    order.sort_by(|&a, &b| {
        weights[b]
            .partial_cmp(&weights[a])
            .unwrap_or(Ordering::Equal)
            .then_with(|| matrix.doc_freq(b).cmp(&matrix.doc_freq(a)))
            .then_with(|| matrix.term(a).cmp(matrix.term(b)))
    });

    Ok(order
        .into_iter()
        .take(config.top_n)
        .enumerate()
        .map(|(i, j)| DailyKeyword {
            date: partition.date,
            source: partition.source.clone(),
            media_type: partition.media_type,
            word: matrix.term(j).to_string(),
            count: matrix.term_total(j) as i64,
            weight: weights[j],
            rank: i as i64 + 1,
        })
        .collect())
}

/// Run the extractor over every partition of `date` and persist the rankings.
pub async fn run(
    db: &Arc<dyn Database>,
    corpus: &dyn CorpusReader,
    filter: &LemmaFilter,
    config: &KeywordConfig,
    date: NaiveDate,
) -> Result<StageReport> {
    let mut report = StageReport::new("keywords");
    let docs = corpus.read_window(date, date).await?;
    if docs.is_empty() {
        db.prune_keywords(date, &[]).await?;
        report.skipped(date, "no documents for date");
        return Ok(report);
    }

    let partitions = partition_documents(&docs);
    info!(%date, documents = docs.len(), partitions = partitions.len(), "Extracting keywords");

    // A re-import can move documents out of a partition entirely.
    let keep: Vec<Partition> = partitions.keys().cloned().collect();
    let pruned = db.prune_keywords(date, &keep).await?;
    if pruned > 0 {
        info!(%date, pruned, "Removed keywords of vanished partitions");
    }

    for (partition, members) in &partitions {
        match extract_keywords(partition, members, filter, config) {
            Ok(rows) => {
                db.replace_keywords(partition, &rows).await?;
                report.written(partition, rows.len());
            }
            Err(e) => {
                if e.is_skip() {
                    db.replace_keywords(partition, &[]).await?;
                }
                report.record_error(partition, &e);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::MediaType;

    fn doc(id: i64, lemmas: &[&str]) -> CleanedDocument {
        CleanedDocument {
            article_id: id,
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            source: "bfmtv".into(),
            media_type: MediaType::Tv,
            cleaned_text: lemmas.join(" "),
            lemmas: lemmas.iter().map(|s| s.to_string()).collect(),
            entities: Default::default(),
        }
    }

    fn partition() -> Partition {
        Partition::new(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(), "bfmtv", MediaType::Tv)
    }

    #[test]
    fn test_empty_partition_is_insufficient() {
        let err = extract_keywords(&partition(), &[], &LemmaFilter::default(), &KeywordConfig::default())
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_ties_break_on_doc_freq_then_term() {
        // Five documents; every term appears in exactly one so the ceiling keeps all.
        let docs = vec![
            doc(1, &["zèbre", "zèbre"]),
            doc(2, &["autruche", "autruche"]),
            doc(3, &["girafe"]),
            doc(4, &["panthère"]),
            doc(5, &["lionne"]),
        ];
        let refs: Vec<&CleanedDocument> = docs.iter().collect();
        let rows = extract_keywords(&partition(), &refs, &LemmaFilter::default(), &KeywordConfig::default())
            .unwrap();
        let words: Vec<&str> = rows.iter().map(|r| r.word.as_str()).collect();
        assert_eq!(words, vec!["autruche", "zèbre", "girafe", "lionne", "panthère"]);
        assert_eq!(rows.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(rows[0].count, 2);
    }

    #[test]
    fn test_ceiling_drops_ubiquitous_terms() {
        let docs = vec![
            doc(1, &["gouvernement", "budget"]),
            doc(2, &["gouvernement", "grève"]),
            doc(3, &["gouvernement", "retraite"]),
        ];
        let refs: Vec<&CleanedDocument> = docs.iter().collect();
        let rows = extract_keywords(&partition(), &refs, &LemmaFilter::default(), &KeywordConfig::default())
            .unwrap();
        assert!(rows.iter().all(|r| r.word != "gouvernement"));
        assert_eq!(rows.len(), 3);
    }
}
