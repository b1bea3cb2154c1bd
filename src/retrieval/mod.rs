//! Retrieval connector over a similarity-search store
//!
//! The store is shared and read-mostly; connectors take `&self`.

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Similarity search collaborator. An empty result is a valid response.
#[async_trait]
pub trait RetrievalConnector: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>>;
}

pub const LOAN_PRODUCT_DOCUMENTS: &[&str] = &[
    "Personal Loan: Max 5,00,000, Interest Rate: 10-15%, Term: 12-60 months, Eligibility: Salaried employees, good credit score (650+).",
    "Home Loan: Max 50,00,000, Interest Rate: 7-9%, Term: 60-360 months, Eligibility: Property owners, stable income.",
    "Education Loan: Max 20,00,000, Interest Rate: 8-12%, Term: 12-120 months, Eligibility: Students admitted to recognized institutions.",
    "Car Loan: Max 15,00,000, Interest Rate: 9-14%, Term: 12-84 months, Eligibility: Salaried/Self-employed, new or used car purchase.",
    "Eligibility Criteria: All applicants must be 21-60 years old, Indian citizens, with a minimum monthly income of 25,000 for personal loans.",
    "KYC Documents: Valid ID proof (Aadhaar, Passport, Driving License), Address proof (Utility Bill, Bank Statement), PAN Card.",
    "Credit Score Impact: A higher credit score (700+) usually results in better interest rates. Scores below 600 might lead to rejection.",
    "Loan Sanction Process: Once approved, a digital sanction letter is issued. Physical documents might be required for final disbursement.",
];

struct IndexedDocument {
    text: String,
    terms: HashMap<String, f64>,
    norm: f64,
}

/// Bag-of-words cosine similarity over an in-memory corpus
pub struct InMemoryKnowledgeBase {
    documents: Vec<IndexedDocument>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
        }
    }

    pub fn with_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut kb = Self::new();
        for doc in documents {
            kb.add_document(doc);
        }
        kb
    }

    pub fn with_loan_products() -> Self {
        Self::with_documents(LOAN_PRODUCT_DOCUMENTS.iter().copied())
    }

    pub fn add_document(&mut self, text: impl Into<String>) {
        let text = text.into();
        let terms = term_frequencies(&text);
        let norm = vector_norm(&terms);
        self.documents.push(IndexedDocument { text, terms, norm });
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn rank(&self, query: &str, top_k: usize) -> Vec<String> {
        let query_terms = term_frequencies(query);
        let query_norm = vector_norm(&query_terms);
        if query_norm == 0.0 || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, usize)> = self
            .documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| doc.norm > 0.0)
            .map(|(idx, doc)| {
                let dot: f64 = query_terms
                    .iter()
                    .filter_map(|(term, weight)| doc.terms.get(term).map(|w| w * weight))
                    .sum();
                (dot / (doc.norm * query_norm), idx)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // Highest similarity first; ties keep insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .take(top_k)
            .map(|(_, idx)| self.documents[idx].text.clone())
            .collect()
    }
}

impl Default for InMemoryKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetrievalConnector for InMemoryKnowledgeBase {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        let results = self.rank(query, top_k);
        debug!(top_k, matches = results.len(), "Knowledge base searched");
        Ok(results)
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
    {
        *terms.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
    }
    terms
}

fn vector_norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|w| w * w).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_best_match_ranks_first() {
        let kb = InMemoryKnowledgeBase::with_loan_products();
        let results = kb.search("Which KYC documents and ID proof do I need?", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].starts_with("KYC Documents"));

        let results = kb.search("car loan interest rate", 2).await.unwrap();
        assert!(results[0].starts_with("Car Loan"));
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing() {
        let kb = InMemoryKnowledgeBase::new();
        assert!(kb.is_empty());
        let results = kb.search("home loan", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_query_has_no_matches() {
        let kb = InMemoryKnowledgeBase::with_documents(["Home Loan: Max 50,00,000"]);
        let results = kb.search("zebra", 3).await.unwrap();
        assert!(results.is_empty());
    }
}
