pub mod edit_tag;
pub mod repair;

pub use edit_tag::{
    EDIT_TAG, EditTagParse, OpKind, Statement, TableOp, canonical_block, canonical_statement,
    extract_tag_blocks, parse_edit_tag, parse_statements, rewrite_tag,
};
pub use repair::{
    Repaired, TablePayload, extract_array, normalize_loose_json, repair_response,
    strip_code_fences, strip_comments,
};
