//! In-memory knowledge base and keyword retrieval.

use lantern_core::{Payload, SpanHandle, SpanUpdate};

use crate::Result;

/// Documents returned when no `top_k` is given.
pub const DEFAULT_TOP_K: usize = 3;

/// Topics and their documents, in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBase {
    topics: Vec<(String, Vec<String>)>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self { topics: Vec::new() }
    }

    /// Adds a topic. Each whitespace-separated word in `name` is a keyword.
    pub fn with_topic<I, S>(mut self, name: impl Into<String>, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics
            .push((name.into(), documents.into_iter().map(Into::into).collect()));
        self
    }

    /// The built-in cloud-native knowledge base.
    pub fn cloud_native() -> Self {
        Self::new()
            .with_topic(
                "kubernetes",
                [
                    "Kubernetes is an open-source container orchestration platform that automates the deployment, scaling, and management of containerized applications.",
                    "Kubernetes provides features like service discovery, load balancing, storage orchestration, automated rollouts and rollbacks, and self-healing.",
                    "Key Kubernetes components include the API server, etcd, kubelet, kube-proxy, and various controllers.",
                ],
            )
            .with_topic(
                "observability",
                [
                    "Observability in cloud-native applications involves monitoring, logging, and tracing to understand system behavior.",
                    "The three pillars of observability are metrics, logs, and traces.",
                    "Popular observability tools include Prometheus for metrics, ELK stack for logging, and Jaeger for distributed tracing.",
                ],
            )
            .with_topic(
                "devops",
                [
                    "DevOps is a set of practices that combines software development and IT operations to shorten the development lifecycle.",
                    "Key DevOps practices include continuous integration, continuous deployment, infrastructure as code, and monitoring.",
                    "DevOps tools include Jenkins, GitLab CI, Docker, Kubernetes, Terraform, and Ansible.",
                ],
            )
            .with_topic(
                "microservices",
                [
                    "Microservices architecture is an approach to building applications as a collection of loosely coupled services.",
                    "Each microservice is independently deployable and can be developed by different teams using different technologies.",
                    "Microservices communicate through well-defined APIs, typically using HTTP/REST or message queues.",
                ],
            )
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|(name, _)| name.as_str())
    }

    /// Keyword retrieval.
    ///
    /// A topic matches when any of its keywords occurs as a substring of the
    /// lowercased query. Documents of matching topics are concatenated in
    /// topic order and cut to `top_k`.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<String> {
        let query = query.to_lowercase();
        self.topics
            .iter()
            .filter(|(name, _)| name.split_whitespace().any(|kw| query.contains(kw)))
            .flat_map(|(_, docs)| docs.iter().cloned())
            .take(top_k)
            .collect()
    }

    /// [`retrieve`](Self::retrieve) inside a `document_retrieval` child span.
    pub fn retrieve_traced(
        &self,
        parent: &SpanHandle,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<String>> {
        let span = parent.start_span("document_retrieval", Some(query.into()))?;
        let documents = self.retrieve(query, top_k);
        span.update(
            SpanUpdate::new()
                .output(Payload::from(documents.clone()))
                .metadata("total_docs", documents.len()),
        );
        span.end();
        tracing::debug!(found = documents.len(), "documents retrieved");
        Ok(documents)
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::cloud_native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubernetes_query_returns_kubernetes_docs() {
        let kb = KnowledgeBase::cloud_native();
        let docs = kb.retrieve("What is Kubernetes", DEFAULT_TOP_K);
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| d.contains("Kubernetes")));
        assert!(docs[0].starts_with("Kubernetes is an open-source container orchestration"));
        assert!(docs[2].starts_with("Key Kubernetes components"));
    }

    #[test]
    fn matches_follow_topic_order_and_truncate() {
        let kb = KnowledgeBase::cloud_native();
        let docs = kb.retrieve(
            "How can I implement observability in my microservices architecture?",
            DEFAULT_TOP_K,
        );
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| d.to_lowercase().contains("observability")));

        let all = kb.retrieve("microservices and devops", 10);
        assert_eq!(all.len(), 6);
        assert!(all[0].starts_with("DevOps is a set of practices"));
        assert!(all[3].starts_with("Microservices architecture"));
    }

    #[test]
    fn no_match_returns_nothing() {
        let kb = KnowledgeBase::cloud_native();
        assert!(kb.retrieve("What is the weather today?", DEFAULT_TOP_K).is_empty());
    }

    #[test]
    fn multi_word_topic_matches_any_keyword() {
        let kb = KnowledgeBase::new().with_topic("service mesh", ["Istio and Linkerd are meshes."]);
        assert_eq!(kb.retrieve("Which MESH should I pick?", 3).len(), 1);
        assert_eq!(kb.retrieve("service discovery", 3).len(), 1);
    }

    #[test]
    fn topic_order_is_fixed() {
        let kb = KnowledgeBase::cloud_native();
        let topics: Vec<&str> = kb.topics().collect();
        assert_eq!(topics, ["kubernetes", "observability", "devops", "microservices"]);
    }
}
