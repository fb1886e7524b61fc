use decl_compiler::annotations::KNOWN_TAGS;
use decl_compiler::{analyze, Analysis, DescriptorGraph, Severity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing_subscriber::EnvFilter;

const MARKERS: &[(&str, &str)] = &[
    ("Server", "Service metadata: name, version, auth"),
    ("Tool", "Callable operation: name, params, result, behavior flags"),
    ("Prompt", "Prompt template: name, args, template or dynamic"),
    ("Resource", "Addressable data: uri, name, mimeType, data or dynamic"),
    ("ToolGroup", "Capability group: name, tools"),
    ("Integer", "Whole-number parameter type"),
];

/// Latest text of a document and the analysis of exactly that text
struct Document {
    text: String,
    analysis: Option<Analysis>,
}

#[derive(Clone)]
struct Backend {
    client: Client,
    documents: Arc<RwLock<HashMap<Url, Arc<Document>>>>,
}

impl Backend {
    fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn update(&self, uri: Url, text: String) {
        let path = uri
            .to_file_path()
            .unwrap_or_else(|_| uri.path().into());
        let analysis = match analyze(&text, &path) {
            Ok(analysis) => Some(analysis),
            Err(err) => {
                tracing::error!(%uri, "analysis failed: {}", err);
                let _ = self
                    .client
                    .log_message(MessageType::ERROR, format!("decl: {}", err))
                    .await;
                None
            }
        };
        let diagnostics = analysis
            .as_ref()
            .map(|a| to_lsp_diagnostics(a, &text))
            .unwrap_or_default();

        // Replace the whole document state at once
        let document = Arc::new(Document { text, analysis });
        self.documents.write().await.insert(uri.clone(), document);

        let _ = self
            .client
            .publish_diagnostics(uri, diagnostics, None)
            .await;
    }

    async fn document(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents.read().await.get(uri).cloned()
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, _: InitializeParams) -> tower_lsp::jsonrpc::Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec!["@".to_string()]),
                    ..CompletionOptions::default()
                }),
                ..ServerCapabilities::default()
            },
            server_info: Some(ServerInfo {
                name: "decl-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        let _ = self.client.log_message(MessageType::INFO, "decl LSP ready").await;
    }

    async fn shutdown(&self) -> tower_lsp::jsonrpc::Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        self.update(params.text_document.uri, params.text_document.text)
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(text) = params.content_changes.into_iter().last().map(|c| c.text) else {
            return;
        };
        self.update(uri, text).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.write().await.remove(&uri);
        let _ = self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn hover(&self, params: HoverParams) -> tower_lsp::jsonrpc::Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let Some(document) = self.document(&uri).await else {
            return Ok(None);
        };
        let Some((range, word, after_at)) = word_at_position(&document.text, position) else {
            return Ok(None);
        };

        let text = if after_at {
            KNOWN_TAGS
                .iter()
                .find(|(tag, _)| *tag == word)
                .map(|(tag, doc)| format!("`@{}`: {}", tag, doc))
        } else {
            MARKERS
                .iter()
                .find(|(marker, _)| *marker == word)
                .map(|(marker, doc)| format!("`{}`: {}", marker, doc))
                .or_else(|| {
                    document
                        .analysis
                        .as_ref()
                        .and_then(|a| describe_descriptor(&a.graph, &word))
                })
        };

        Ok(text.map(|value| Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
            }),
            range: Some(range),
        }))
    }

    async fn completion(
        &self,
        params: CompletionParams,
    ) -> tower_lsp::jsonrpc::Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(document) = self.document(&uri).await else {
            return Ok(None);
        };

        let items: Vec<CompletionItem> = if in_tag_position(&document.text, position) {
            KNOWN_TAGS
                .iter()
                .map(|(tag, doc)| CompletionItem {
                    label: tag.to_string(),
                    kind: Some(CompletionItemKind::KEYWORD),
                    detail: Some(doc.to_string()),
                    ..CompletionItem::default()
                })
                .collect()
        } else {
            MARKERS
                .iter()
                .map(|(marker, doc)| CompletionItem {
                    label: marker.to_string(),
                    kind: Some(CompletionItemKind::INTERFACE),
                    detail: Some(doc.to_string()),
                    ..CompletionItem::default()
                })
                .collect()
        };
        Ok(Some(CompletionResponse::Array(items)))
    }
}

fn to_lsp_diagnostics(analysis: &Analysis, text: &str) -> Vec<Diagnostic> {
    analysis
        .diagnostics
        .iter()
        .map(|d| {
            let start = d.location.start;
            // At least one character wide so editors render it
            let end = if d.location.end <= start { start + 1 } else { d.location.end };
            Diagnostic {
                range: Range {
                    start: byte_offset_to_position(text, start),
                    end: byte_offset_to_position(text, end),
                },
                severity: Some(match d.severity {
                    Severity::Error => DiagnosticSeverity::ERROR,
                    Severity::Warning => DiagnosticSeverity::WARNING,
                }),
                code: Some(NumberOrString::String(d.code.as_str().to_string())),
                code_description: None,
                source: Some("decl".to_string()),
                message: d.message.clone(),
                related_information: None,
                tags: None,
                data: None,
            }
        })
        .collect()
}

/// Short markdown summary of the descriptor with the given name
fn describe_descriptor(graph: &DescriptorGraph, name: &str) -> Option<String> {
    if let Some(op) = graph.operation(name) {
        let params: Vec<&str> = op
            .params
            .fields()
            .map(|f| f.keys().map(String::as_str).collect())
            .unwrap_or_default();
        let handler = op.handler.as_ref().map(|h| h.symbol.as_str()).unwrap_or("unbound");
        return Some(format!(
            "**operation** `{}`\n\nparams: {}\n\nhandler: `{}`",
            op.name,
            if params.is_empty() { "none".to_string() } else { params.join(", ") },
            handler
        ));
    }
    if let Some(prompt) = graph.prompt(name) {
        let args: Vec<&str> = prompt.arguments.iter().map(|a| a.name.as_str()).collect();
        return Some(format!("**prompt** `{}`\n\nargs: {}", prompt.name, args.join(", ")));
    }
    if let Some(resource) = graph.resource(name) {
        return Some(format!(
            "**resource** `{}`\n\n`{}` ({})",
            resource.name, resource.uri, resource.mime_type
        ));
    }
    graph.group(name).map(|group| {
        format!("**group** `{}`\n\ntools: {}", group.name, group.operations.join(", "))
    })
}

fn byte_offset_to_position(text: &str, byte_offset: usize) -> Position {
    let mut line = 0;
    let mut col = 0;

    for (idx, ch) in text.char_indices() {
        if idx >= byte_offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += ch.len_utf16();
        }
    }

    Position::new(line as u32, col as u32)
}

/// Word under the cursor, and whether it directly follows an `@`
fn word_at_position(text: &str, position: Position) -> Option<(Range, String, bool)> {
    let line = position.line as usize;

    let line_str = text.lines().nth(line)?;
    let offset = utf16_to_byte(line_str, position.character)?;

    let bytes = line_str.as_bytes();
    let mut start = offset;
    while start > 0 && is_word_byte(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = offset;
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }

    if start == end {
        return None;
    }

    let word = line_str[start..end].to_string();
    let after_at = start > 0 && bytes[start - 1] == b'@';
    let column = |byte: usize| line_str[..byte].encode_utf16().count() as u32;
    let range = Range {
        start: Position::new(line as u32, column(start)),
        end: Position::new(line as u32, column(end)),
    };
    Some((range, word, after_at))
}

/// Cursor sits right after `@` or inside a partial tag name
fn in_tag_position(text: &str, position: Position) -> bool {
    let Some(line_str) = text.lines().nth(position.line as usize) else {
        return false;
    };
    let end = utf16_to_byte(line_str, position.character).unwrap_or(line_str.len());
    let prefix = &line_str[..end];
    let word_start = prefix
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    prefix[..word_start].ends_with('@')
}

/// Byte offset of a UTF-16 column within a line, `None` past its end
fn utf16_to_byte(line: &str, character: u32) -> Option<usize> {
    let target = character as usize;
    let mut units = 0;
    for (idx, ch) in line.char_indices() {
        if units >= target {
            return Some(idx);
        }
        units += ch.len_utf16();
    }
    (units >= target).then_some(line.len())
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("DECL_LOG"))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let (stdin, stdout) = (tokio::io::stdin(), tokio::io::stdout());
    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions() {
        let text = "ab\ncdé f";
        assert_eq!(byte_offset_to_position(text, 0), Position::new(0, 0));
        assert_eq!(byte_offset_to_position(text, 4), Position::new(1, 1));
        assert_eq!(byte_offset_to_position(text, 8), Position::new(1, 4));
    }

    #[test]
    fn test_tag_position() {
        let text = "  /** @mi */";
        assert!(in_tag_position(text, Position::new(0, 9)));
        assert!(in_tag_position(text, Position::new(0, 7)));
        assert!(!in_tag_position(text, Position::new(0, 4)));

        let (_, word, after_at) = word_at_position(text, Position::new(0, 8)).unwrap();
        assert_eq!(word, "mi");
        assert!(after_at);
    }

    #[test]
    fn test_word_after_non_ascii_text() {
        let text = "/** é @min 1 */";
        let (range, word, after_at) = word_at_position(text, Position::new(0, 7)).unwrap();
        assert_eq!(word, "min");
        assert!(after_at);
        assert_eq!(range.start, Position::new(0, 7));
        assert_eq!(range.end, Position::new(0, 10));
        assert!(in_tag_position(text, Position::new(0, 8)));
        assert!(word_at_position(text, Position::new(0, 40)).is_none());
    }

    #[test]
    fn test_diagnostics_carry_codes() {
        let text = "interface Svc extends Server { name: \"svc\"; version: \"1\" }\ninterface Add extends Tool { name: \"add\" }\n";
        let analysis = analyze(text, "inline.ts").unwrap();
        let diagnostics = to_lsp_diagnostics(&analysis, text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, Some(NumberOrString::String("E0401".to_string())));
        assert_eq!(diagnostics[0].range.start.line, 1);
    }
}
