//! Build-context materialization.
//!
//! The worker renders the agent version's flow document into a templated
//! container build context (Dockerfile + flow artifact) and emits it as a
//! gzipped tar archive, entirely in memory.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value as Json;

use crate::error::{EngineError, Result};

const DOCKERFILE_TEMPLATE: &str = "\
FROM {runtime_image}
COPY flow.json /app/flow.json
ENV AGENT_FLOW_PATH=/app/flow.json
ENV AGENT_HOST=0.0.0.0
ENV AGENT_PORT=8080
EXPOSE 8080
";

/// An in-memory container build context.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Gzipped tar archive with `Dockerfile` and `flow.json` at the root.
    pub archive: Vec<u8>,
}

impl BuildContext {
    /// Render a version's flow document into a build context.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow cannot be serialized or the archive
    /// cannot be assembled.
    pub fn materialize(flow: &Json, runtime_image: &str) -> Result<Self> {
        let dockerfile = DOCKERFILE_TEMPLATE.replace("{runtime_image}", runtime_image);
        let flow_json = serde_json::to_vec_pretty(flow)
            .map_err(|e| EngineError::Invalid(format!("flow document not serializable: {e}")))?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        append_file(&mut builder, "Dockerfile", dockerfile.as_bytes())?;
        append_file(&mut builder, "flow.json", &flow_json)?;

        let encoder = builder
            .into_inner()
            .map_err(|e| EngineError::Invalid(format!("archive assembly failed: {e}")))?;
        let archive = encoder
            .finish()
            .map_err(|e| EngineError::Invalid(format!("archive compression failed: {e}")))?;

        Ok(Self { archive })
    }

    /// Base64 form for APIs that take the context inline (CI dispatch
    /// inputs have a size cap; callers truncate as required).
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.archive)
    }
}

fn append_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, name, content)
        .map_err(|e| EngineError::Invalid(format!("archive entry {name} failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn archive_contains_dockerfile_and_flow() {
        let flow = json!({"nodes": [{"id": "n1"}], "edges": []});
        let context = BuildContext::materialize(&flow, "flowplane/agent-runtime:latest").unwrap();

        let mut tar_bytes = Vec::new();
        GzDecoder::new(context.archive.as_slice())
            .read_to_end(&mut tar_bytes)
            .unwrap();

        let mut archive = tar::Archive::new(tar_bytes.as_slice());
        let mut names = Vec::new();
        let mut dockerfile = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            if name == "Dockerfile" {
                entry.read_to_string(&mut dockerfile).unwrap();
            }
            names.push(name);
        }

        names.sort();
        assert_eq!(names, vec!["Dockerfile", "flow.json"]);
        assert!(dockerfile.contains("FROM flowplane/agent-runtime:latest"));
        assert!(dockerfile.contains("EXPOSE 8080"));
    }

    #[test]
    fn base64_roundtrips() {
        let context = BuildContext::materialize(&json!({}), "img").unwrap();
        let decoded = STANDARD.decode(context.to_base64()).unwrap();
        assert_eq!(decoded, context.archive);
    }
}
