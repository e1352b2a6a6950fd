//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document for the inbox REST API.
//!
//! Usage: `openapi [OUTPUT]`, where OUTPUT defaults to `openapi.json`.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

/// Serializes `api_doc` and writes it to `path`.
fn generate_spec(
    api_doc: utoipa::openapi::OpenApi,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = api_doc.to_pretty_json()?;
    std::fs::write(path, spec_json)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
    generate_spec(ApiDoc::openapi(), &output)?;
    println!("OpenAPI document for {} paths written to {}", ApiDoc::openapi().paths.paths.len(), output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_document_lists_the_inbox_routes() {
        let path = std::env::temp_dir().join(format!("inbox-openapi-{}.json", std::process::id()));
        let path = path.to_str().unwrap();
        generate_spec(ApiDoc::openapi(), path).unwrap();

        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        std::fs::remove_file(path).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for route in ["/messages", "/messages/{id}/similar", "/sync", "/policies/{id}"] {
            assert!(paths.contains_key(route), "missing {route}");
        }
        let list_params = doc["paths"]["/messages"]["get"]["parameters"].as_array().unwrap();
        assert!(list_params.iter().any(|p| p["name"] == "q"));
    }
}
