use cuels_source::DocumentUri;
use cuels_source::LineIndex;
use tower_lsp_server::ls_types::TextDocumentContentChangeEvent;

use crate::WorkspaceError;

/// Apply editor content changes to `content`.
///
/// A single change without a range replaces the whole text, even when the
/// client was asked for incremental updates. Otherwise changes apply in
/// order, each against the result of the previous one.
pub(crate) fn changed_text(
    uri: &DocumentUri,
    content: &str,
    changes: &[TextDocumentContentChangeEvent],
) -> Result<String, WorkspaceError> {
    match changes {
        [] => Err(WorkspaceError::NoContentChanges(uri.clone())),
        [change] if change.range.is_none() && change.range_length.unwrap_or(0) == 0 => {
            Ok(change.text.clone())
        }
        _ => apply_incremental_changes(uri, content, changes),
    }
}

fn apply_incremental_changes(
    uri: &DocumentUri,
    content: &str,
    changes: &[TextDocumentContentChangeEvent],
) -> Result<String, WorkspaceError> {
    let invalid = |message: &str| WorkspaceError::InvalidChange {
        uri: uri.clone(),
        message: message.to_string(),
    };

    let mut content = content.to_string();
    for change in changes {
        let range = change
            .range
            .ok_or_else(|| invalid("unexpected nil range for change"))?;
        let index = LineIndex::new(&content);
        let start = index
            .offset(range.start, &content)
            .ok_or_else(|| invalid("range start out of bounds"))?;
        let end = index
            .offset(range.end, &content)
            .ok_or_else(|| invalid("range end out of bounds"))?;
        if end < start {
            return Err(invalid("invalid range for content change"));
        }
        content.replace_range(start as usize..end as usize, &change.text);
    }
    Ok(content)
}
