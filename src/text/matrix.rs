// Sparse term/document count matrix with smooth TF-IDF weighting.
//
// Rows are documents in the order they were given (callers sort by
// article_id), columns are terms in lexicographic order. Nothing here depends
// on hash iteration order, so two builds over the same input produce the same
// matrix bit for bit.

use std::collections::BTreeMap;

use crate::corpus::{CleanedDocument, LemmaFilter};

#[derive(Debug, Clone)]
pub struct TermDocumentMatrix {
    /// Column index to term, sorted.
    terms: Vec<String>,
    /// Per document: (term index, occurrences), sorted by term index.
    rows: Vec<Vec<(usize, u32)>>,
    /// Article id per row.
    doc_ids: Vec<i64>,
    /// Number of documents containing each term.
    doc_freq: Vec<usize>,
    /// Total occurrences of each term across all documents.
    term_totals: Vec<u64>,
}

impl TermDocumentMatrix {
    /// Build from documents, applying the lemma filter.
    ///
    /// Documents left with no valid lemma are dropped: they carry no lexical
    /// signal and would only dilute document frequencies.
    pub fn from_documents(docs: &[&CleanedDocument], filter: &LemmaFilter) -> Self {
        let tokenized: Vec<(i64, Vec<String>)> = docs
            .iter()
            .map(|d| (d.article_id, filter.filter(&d.lemmas)))
            .filter(|(_, lemmas)| !lemmas.is_empty())
            .collect();
        Self::from_tokens(tokenized)
    }

    /// Build from already filtered token lists.
    pub fn from_tokens(docs: Vec<(i64, Vec<String>)>) -> Self {
        let mut per_doc: Vec<(i64, BTreeMap<String, u32>)> = Vec::with_capacity(docs.len());
        let mut vocabulary: BTreeMap<String, usize> = BTreeMap::new();

        for (id, tokens) in docs {
            let mut counts: BTreeMap<String, u32> = BTreeMap::new();
            for token in tokens {
                *counts.entry(token).or_insert(0) += 1;
            }
            for term in counts.keys() {
                vocabulary.entry(term.clone()).or_insert(0);
            }
            per_doc.push((id, counts));
        }

        // BTreeMap iteration is sorted, so indices follow term order.
        let terms: Vec<String> = vocabulary.keys().cloned().collect();
        for (i, idx) in vocabulary.values_mut().enumerate() {
            *idx = i;
        }

        let mut doc_freq = vec![0usize; terms.len()];
        let mut term_totals = vec![0u64; terms.len()];
        let mut rows = Vec::with_capacity(per_doc.len());
        let mut doc_ids = Vec::with_capacity(per_doc.len());

        for (id, counts) in per_doc {
            let row: Vec<(usize, u32)> = counts
                .into_iter()
                .map(|(term, count)| {
                    let j = vocabulary[&term];
                    doc_freq[j] += 1;
                    term_totals[j] += u64::from(count);
                    (j, count)
                })
                .collect();
            rows.push(row);
            doc_ids.push(id);
        }

        Self {
            terms,
            rows,
            doc_ids,
            doc_freq,
            term_totals,
        }
    }

    pub fn n_docs(&self) -> usize {
        self.rows.len()
    }

    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn term(&self, j: usize) -> &str {
        &self.terms[j]
    }

    pub fn doc_ids(&self) -> &[i64] {
        &self.doc_ids
    }

    pub fn rows(&self) -> &[Vec<(usize, u32)>] {
        &self.rows
    }

    pub fn doc_freq(&self, j: usize) -> usize {
        self.doc_freq[j]
    }

    pub fn term_total(&self, j: usize) -> u64 {
        self.term_totals[j]
    }

    /// Smooth inverse document frequency: `ln((1 + n) / (1 + df)) + 1`.
    pub fn idf(&self, j: usize) -> f64 {
        let n = self.n_docs() as f64;
        let df = self.doc_freq[j] as f64;
        ((1.0 + n) / (1.0 + df)).ln() + 1.0
    }

    /// Keep only the columns accepted by `keep`, reindexing the survivors.
    /// Documents that lose every term are dropped.
    pub fn retain_terms<F>(&self, keep: F) -> Self
    where
        F: Fn(usize) -> bool,
    {
        let mut remap = vec![None; self.terms.len()];
        let mut terms = Vec::new();
        let mut doc_freq = Vec::new();
        let mut term_totals = Vec::new();
        for j in 0..self.terms.len() {
            if keep(j) {
                remap[j] = Some(terms.len());
                terms.push(self.terms[j].clone());
                doc_freq.push(self.doc_freq[j]);
                term_totals.push(self.term_totals[j]);
            }
        }

        let mut rows = Vec::with_capacity(self.rows.len());
        let mut doc_ids = Vec::with_capacity(self.rows.len());
        let mut kept_df = vec![0usize; terms.len()];
        for (row, id) in self.rows.iter().zip(&self.doc_ids) {
            let new_row: Vec<(usize, u32)> = row
                .iter()
                .filter_map(|&(j, c)| remap[j].map(|k| (k, c)))
                .collect();
            if new_row.is_empty() {
                continue;
            }
            for &(k, _) in &new_row {
                kept_df[k] += 1;
            }
            rows.push(new_row);
            doc_ids.push(*id);
        }
        debug_assert_eq!(kept_df, doc_freq);

        Self {
            terms,
            rows,
            doc_ids,
            doc_freq,
            term_totals,
        }
    }

    /// Drop terms present in more than `ratio` of `total_docs` documents.
    ///
    /// `total_docs` is the partition's document count, including documents
    /// that lost every lemma to the filter and never became rows.
    pub fn with_max_df(&self, ratio: f64, total_docs: usize) -> Self {
        let n = total_docs.max(self.n_docs()) as f64;
        self.retain_terms(|j| (self.doc_freq[j] as f64) / n <= ratio)
    }

    /// Keep the `max_terms` most frequent terms (ties broken by term order).
    pub fn with_max_terms(&self, max_terms: usize) -> Self {
        if self.terms.len() <= max_terms {
            return self.clone();
        }
        let mut order: Vec<usize> = (0..self.terms.len()).collect();
        order.sort_by(|&a, &b| self.term_totals[b].cmp(&self.term_totals[a]).then(a.cmp(&b)));
        let mut keep = vec![false; self.terms.len()];
        for &j in order.iter().take(max_terms) {
            keep[j] = true;
        }
        self.retain_terms(|j| keep[j])
    }

    /// TF-IDF weighted rows (raw tf times smooth idf). With `l2_normalize`
    /// each document vector is scaled to unit length.
    pub fn tfidf_rows(&self, l2_normalize: bool) -> Vec<Vec<(usize, f64)>> {
        let idf: Vec<f64> = (0..self.n_terms()).map(|j| self.idf(j)).collect();
        self.rows
            .iter()
            .map(|row| {
                let mut weighted: Vec<(usize, f64)> = row
                    .iter()
                    .map(|&(j, c)| (j, f64::from(c) * idf[j]))
                    .collect();
                if l2_normalize {
                    let norm = weighted.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                    if norm > 0.0 {
                        for (_, w) in &mut weighted {
                            *w /= norm;
                        }
                    }
                }
                weighted
            })
            .collect()
    }

    /// Sum of the unnormalized TF-IDF weight of each term over all documents.
    pub fn term_weights(&self) -> Vec<f64> {
        let mut weights = vec![0.0; self.n_terms()];
        for row in self.tfidf_rows(false) {
            for (j, w) in row {
                weights[j] += w;
            }
        }
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(id: i64, words: &[&str]) -> (i64, Vec<String>) {
        (id, words.iter().map(|w| w.to_string()).collect())
    }

    #[test]
    fn test_vocabulary_is_sorted_and_counted() {
        let m = TermDocumentMatrix::from_tokens(vec![
            tokens(1, &["retraite", "budget", "budget"]),
            tokens(2, &["budget", "grève"]),
        ]);
        assert_eq!(m.terms(), &["budget", "grève", "retraite"]);
        assert_eq!(m.doc_freq(0), 2);
        assert_eq!(m.term_total(0), 3);
        assert_eq!(m.rows()[0], vec![(0, 2), (2, 1)]);
    }

    #[test]
    fn test_idf_is_smooth() {
        let m = TermDocumentMatrix::from_tokens(vec![
            tokens(1, &["budget"]),
            tokens(2, &["budget", "grève"]),
        ]);
        // Present everywhere: ln(3/3) + 1
        assert!((m.idf(0) - 1.0).abs() < 1e-12);
        assert!((m.idf(1) - ((3.0f64 / 2.0).ln() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_max_df_drops_ubiquitous_terms() {
        let m = TermDocumentMatrix::from_tokens(vec![
            tokens(1, &["budget", "grève"]),
            tokens(2, &["budget", "retraite"]),
            tokens(3, &["budget"]),
        ]);
        let filtered = m.with_max_df(0.4, 3);
        assert_eq!(filtered.terms(), &["grève", "retraite"]);
        // document 3 only had "budget"
        assert_eq!(filtered.doc_ids(), &[1, 2]);
    }

    #[test]
    fn test_max_df_counts_documents_without_rows() {
        let m = TermDocumentMatrix::from_tokens(vec![
            tokens(1, &["budget", "grève"]),
            tokens(2, &["budget"]),
        ]);
        // Two rows, but five documents in the partition: 2/5 stays under 0.4.
        assert_eq!(m.with_max_df(0.4, 5).terms(), &["budget", "grève"]);
        assert_eq!(m.with_max_df(0.4, 2).terms().len(), 0);
    }

    #[test]
    fn test_max_terms_keeps_most_frequent() {
        let m = TermDocumentMatrix::from_tokens(vec![tokens(1, &["a_x", "b_y", "b_y", "c_z"])]);
        let capped = m.with_max_terms(2);
        assert_eq!(capped.terms(), &["a_x", "b_y"]);
    }

    #[test]
    fn test_tfidf_rows_normalized() {
        let m = TermDocumentMatrix::from_tokens(vec![
            tokens(1, &["budget", "grève", "grève"]),
            tokens(2, &["budget"]),
        ]);
        for row in m.tfidf_rows(true) {
            let norm: f64 = row.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }
}
