//! Blocking HTTP client for the remote imagery service.

use crate::core::config::ServiceConfig;
use crate::core::error::{RemoteError, RemoteResult};
use crate::core::types::Value;
use crate::execution::service::ImageryService;
use crate::export::task::{Destination, ExportKind, ExportRequest, ImageExportOptions, TaskId};
use crate::graph::expr::Expr;
use crate::graph::handle::Handle;
use crate::graph::serialization::SerializedExpression;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize)]
struct ComputeResponse {
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct OperationResponse {
    name: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Client for the service's REST endpoints.
pub struct HttpService {
    agent: ureq::Agent,
    base_url: String,
    access_token: Option<String>,
}

impl HttpService {
    /// Create a client from configuration.
    pub fn new(config: &ServiceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            base_url: format!(
                "{}/v1/projects/{}",
                config.endpoint.trim_end_matches('/'),
                config.project
            ),
            access_token: config.access_token.clone(),
        }
    }

    /// Base URL all calls are made under.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, method: &str, body: serde_json::Value) -> RemoteResult<ureq::Response> {
        let url = format!("{}/{}", self.base_url, method);
        debug!("POST {}", url);
        let mut request = self.agent.post(&url);
        if let Some(token) = &self.access_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request.send_json(body).map_err(map_ureq_error)
    }
}

impl std::fmt::Debug for HttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl ImageryService for HttpService {
    fn compute(&self, expr: &Arc<Expr>) -> RemoteResult<Value> {
        let body = json!({ "expression": SerializedExpression::from_expr(expr)? });
        let response: ComputeResponse = self
            .post("value:compute", body)?
            .into_json()
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
        Ok(Value::from_wire(response.result))
    }

    fn start_export(&self, request: &ExportRequest) -> RemoteResult<TaskId> {
        let method = match request.kind {
            ExportKind::Table { .. } => "table:export",
            ExportKind::Image(_) => "image:export",
        };
        let response: OperationResponse = self
            .post(method, export_body(request)?)?
            .into_json()
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
        Ok(TaskId(response.name))
    }
}

/// JSON body of an export call.
///
/// The correlation id stays on the client; the service only sees the
/// description and output paths.
pub fn export_body(request: &ExportRequest) -> RemoteResult<serde_json::Value> {
    let mut body = Map::new();
    body.insert("description".to_string(), json!(request.description));

    let prefix = request
        .file_name_prefix
        .clone()
        .unwrap_or_else(|| request.description.clone());
    let destination = match &request.destination {
        Destination::Drive { folder } => json!({
            "driveDestination": { "folder": folder, "filenamePrefix": prefix }
        }),
        Destination::CloudStorage { bucket } => json!({
            "cloudStorageDestination": { "bucket": bucket, "filenamePrefix": prefix }
        }),
    };

    match &request.kind {
        ExportKind::Table { format } => {
            body.insert(
                "expression".to_string(),
                json!(SerializedExpression::from_expr(&request.expression)?),
            );
            body.insert(
                "fileExportOptions".to_string(),
                merge(json!({ "fileFormat": format }), destination),
            );
        }
        ExportKind::Image(options) => {
            let clipped = clip_to_region(&request.expression, options);
            body.insert(
                "expression".to_string(),
                json!(SerializedExpression::from_expr(&clipped)?),
            );

            let mut geotiff = json!({ "skipEmptyFiles": options.skip_empty_tiles });
            if let Some((w, h)) = options.file_dimensions {
                geotiff["tileDimensions"] = json!({ "width": w, "height": h });
            }
            if let Some(shard) = options.shard_size {
                geotiff["tileSize"] = json!(shard);
            }
            let file_options = json!({ "fileFormat": options.format, "geoTiffOptions": geotiff });
            body.insert(
                "fileExportOptions".to_string(),
                merge(file_options, destination),
            );

            if let Some(max_pixels) = options.max_pixels {
                body.insert("maxPixels".to_string(), json!(max_pixels.to_string()));
            }
        }
    }
    Ok(serde_json::Value::Object(body))
}

/// Scale and region are applied to the image itself before it is exported.
fn clip_to_region(image: &Arc<Expr>, options: &ImageExportOptions) -> Arc<Expr> {
    let mut call = Expr::call("Image.clipToBoundsAndScale").arg("input", image.clone());
    if let Some(region) = &options.region {
        call = call.arg("geometry", region.expr().clone());
    }
    call.constant("scale", options.scale).build()
}

fn merge(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(base), serde_json::Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

fn map_ureq_error(error: ureq::Error) -> RemoteError {
    match error {
        ureq::Error::Status(status, response) => {
            let text = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            if status == 429 {
                RemoteError::QuotaExceeded(message)
            } else {
                RemoteError::Http { status, message }
            }
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ImageData;
    use crate::export::task::TableFormat;
    use crate::graph::handle::{FeatureCollection, Image};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn config() -> ServiceConfig {
        ServiceConfig {
            endpoint: "https://example.test/".to_string(),
            project: "my-project".to_string(),
            access_token: Some("secret".to_string()),
            timeout_secs: 5,
        }
    }

    fn local_config(endpoint: String) -> ServiceConfig {
        ServiceConfig {
            endpoint,
            project: "my-project".to_string(),
            access_token: None,
            timeout_secs: 5,
        }
    }

    /// Answer one request on a loopback port with a canned response.
    /// The thread yields the request line and body it received.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request_body = vec![0; content_length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).unwrap();
            (request_line, String::from_utf8(request_body).unwrap())
        });
        (endpoint, handle)
    }

    fn table_request() -> ExportRequest {
        ExportRequest::table(
            &FeatureCollection::load("training"),
            "ts_0",
            Destination::Drive {
                folder: "exports".to_string(),
            },
            TableFormat::Csv,
        )
    }

    #[test]
    fn test_base_url() {
        let service = HttpService::new(&config());
        assert_eq!(service.base_url(), "https://example.test/v1/projects/my-project");
        assert!(!format!("{:?}", service).contains("secret"));
    }

    #[test]
    fn test_table_export_body() {
        let collection = FeatureCollection::load("training");
        let request = ExportRequest::table(
            &collection,
            "ts_0",
            Destination::CloudStorage {
                bucket: "bucket".to_string(),
            },
            TableFormat::Csv,
        )
        .with_file_name_prefix("training_data/ts_0");

        let body = export_body(&request).unwrap();
        assert_eq!(body["description"], "ts_0");
        assert_eq!(body["fileExportOptions"]["fileFormat"], "CSV");
        assert_eq!(
            body["fileExportOptions"]["cloudStorageDestination"]["filenamePrefix"],
            "training_data/ts_0"
        );
        assert!(body.get("correlationId").is_none());
        assert!(body["expression"].get("version").is_none());
        assert_eq!(body["expression"]["values"]["0"]["constantValue"], "training");
        assert_eq!(
            body["expression"]["values"]["1"]["functionInvocationValue"]["arguments"]["tableId"],
            json!({ "valueReference": "0" })
        );
    }

    #[test]
    fn test_image_export_body() {
        let image = Image::load("S1/a");
        let options = ImageExportOptions::new(10.0)
            .with_region(image.geometry().bounds())
            .with_tiles(64)
            .with_skip_empty_tiles(true)
            .with_max_pixels(10_000_000_000_000);
        let request = ExportRequest::image(
            &image,
            "img_0",
            Destination::Drive {
                folder: "out".to_string(),
            },
            options,
        );

        let body = export_body(&request).unwrap();
        let expression = &body["expression"];
        let root = expression["result"].as_str().unwrap();
        let clip = &expression["values"][root]["functionInvocationValue"];
        assert_eq!(clip["functionName"], "Image.clipToBoundsAndScale");
        let scale = clip["arguments"]["scale"]["valueReference"].as_str().unwrap();
        assert_eq!(expression["values"][scale]["constantValue"], 10.0);
        assert!(clip["arguments"]["geometry"].is_object());

        let file_options = &body["fileExportOptions"];
        assert_eq!(file_options["fileFormat"], "GEO_TIFF");
        assert_eq!(file_options["geoTiffOptions"]["tileDimensions"]["width"], 64);
        assert_eq!(file_options["geoTiffOptions"]["tileSize"], 64);
        assert_eq!(file_options["geoTiffOptions"]["skipEmptyFiles"], true);
        assert_eq!(file_options["driveDestination"]["filenamePrefix"], "img_0");
        assert_eq!(body["maxPixels"], "10000000000000");
        assert!(body.get("grid").is_none());
    }

    #[test]
    fn test_compute_decodes_raw_result() {
        let (endpoint, server) = serve_once("200 OK", r#"{"result": "S1_2023_07_04_IW"}"#);
        let service = HttpService::new(&local_config(endpoint));

        let value = service.compute(Image::load("S1/a").expr()).unwrap();
        assert_eq!(value, Value::String("S1_2023_07_04_IW".to_string()));

        let (request_line, body) = server.join().unwrap();
        assert!(request_line.starts_with("POST /v1/projects/my-project/value:compute "));
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["expression"]["result"], "1");
    }

    #[test]
    fn test_start_export_returns_operation_name() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"name": "projects/my-project/operations/ABC123"}"#);
        let service = HttpService::new(&local_config(endpoint));

        let task = service.start_export(&table_request()).unwrap();
        assert_eq!(task, TaskId("projects/my-project/operations/ABC123".to_string()));
        let (request_line, _) = server.join().unwrap();
        assert!(request_line.starts_with("POST /v1/projects/my-project/table:export "));
    }

    #[test]
    fn test_429_is_quota_exceeded() {
        let (endpoint, server) = serve_once(
            "429 Too Many Requests",
            r#"{"error": {"code": 429, "message": "Too many tasks already in the queue", "status": "RESOURCE_EXHAUSTED"}}"#,
        );
        let service = HttpService::new(&local_config(endpoint));

        let err = service.start_export(&table_request()).unwrap_err();
        assert_eq!(
            err,
            RemoteError::QuotaExceeded("Too many tasks already in the queue".to_string())
        );
        assert!(err.is_quota());
        server.join().unwrap();
    }

    #[test]
    fn test_error_status_carries_service_message() {
        let (endpoint, server) = serve_once(
            "400 Bad Request",
            r#"{"error": {"code": 400, "message": "Image.load: Image asset 'S1/a' not found.", "status": "INVALID_ARGUMENT"}}"#,
        );
        let service = HttpService::new(&local_config(endpoint));

        let err = service.compute(Image::load("S1/a").expr()).unwrap_err();
        assert_eq!(
            err,
            RemoteError::Http {
                status: 400,
                message: "Image.load: Image asset 'S1/a' not found.".to_string()
            }
        );
        server.join().unwrap();
    }

    #[test]
    fn test_error_status_without_json_body() {
        let (endpoint, server) = serve_once("503 Service Unavailable", "backend down");
        let service = HttpService::new(&local_config(endpoint));

        let err = service.compute(Image::load("S1/a").expr()).unwrap_err();
        assert_eq!(
            err,
            RemoteError::Http {
                status: 503,
                message: "backend down".to_string()
            }
        );
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_transport() {
        let endpoint = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };
        let service = HttpService::new(&local_config(endpoint));

        let err = service.compute(Image::load("S1/a").expr()).unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)), "got {:?}", err);
        let err = service.start_export(&table_request()).unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)), "got {:?}", err);
    }

    #[test]
    fn test_unencodable_expression_fails_before_sending() {
        // Nothing listens here; encoding must fail first.
        let service = HttpService::new(&local_config("http://127.0.0.1:9".to_string()));
        let image = Expr::constant(Value::Image(ImageData::new("S1/a")));
        assert!(matches!(
            service.compute(&image),
            Err(RemoteError::Encoding(_))
        ));
    }
}
