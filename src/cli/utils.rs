use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::error::ServiceError;

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(response), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                response.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error in the appropriate format. Service errors keep their code and field errors.
pub fn output_error(output_format: &OutputFormat, err: &anyhow::Error) -> anyhow::Result<()> {
    let service = err.downcast_ref::<ServiceError>();

    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": err.to_string()
            });

            if let Some(service) = service {
                response["error_code"] = json!(service.error_code());
                response["status"] = json!(service.status_code());
                let body = service.to_json();
                if let Some(details) = body.get("errors").or_else(|| body.get("failures")) {
                    response["details"] = details.clone();
                }
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", err);
            if let Some(ServiceError::Validation(errors)) = service {
                for field in &errors.errors {
                    eprintln!("  {}: {}", field.key, field.message);
                }
            }
            if let Some(ServiceError::BatchFailed { failures, .. }) = service {
                for failure in failures {
                    eprintln!("  {}", failure);
                }
            }
        }
    }
    Ok(())
}

/// Output a list of identifiers in the appropriate format
pub fn output_list<T: ToString>(
    output_format: &OutputFormat,
    collection_name: &str,
    empty_message: &str,
    items: impl IntoIterator<Item = T>,
) -> anyhow::Result<()> {
    let items: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();

    match output_format {
        OutputFormat::Json => {
            let mut response = serde_json::Map::new();
            response.insert(collection_name.to_string(), json!(items));
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text if items.is_empty() => {
            println!("{}", empty_message);
        }
        OutputFormat::Text => {
            for item in items {
                println!("{}", item);
            }
        }
    }
    Ok(())
}
