#![allow(dead_code)]
use memsheet::action::{Action, apply_action};
use memsheet::cell::CellValue;
use memsheet::parse::edit_tag::{OpKind, TableOp};
use memsheet::session::Session;
use memsheet::sheet::{Sheet, SheetDomain, SheetKind};
use memsheet::store::CellStore;
use std::collections::BTreeMap;

/// Dynamic chat sheet with plain (description-less) columns.
pub fn sheet(store: &mut CellStore, name: &str, columns: &[&str]) -> Sheet {
    sheet_of_kind(store, name, columns, SheetKind::Dynamic)
}

pub fn sheet_of_kind(
    store: &mut CellStore,
    name: &str,
    columns: &[&str],
    kind: SheetKind,
) -> Sheet {
    let columns: Vec<(String, Option<String>)> =
        columns.iter().map(|c| (c.to_string(), None)).collect();
    Sheet::with_schema(store, name, None, &columns, kind, SheetDomain::Chat)
}

/// Appends one filled data row at the bottom of the sheet.
pub fn push_row(sheet: &mut Sheet, store: &mut CellStore, values: &[&str]) {
    let at = sheet.rows();
    apply_action(sheet, store, &Action::InsertRow { at }).expect("insert row");
    for (col, text) in values.iter().enumerate() {
        if text.is_empty() {
            continue;
        }
        apply_action(
            sheet,
            store,
            &Action::EditCell {
                row: at,
                col: col + 1,
                value: CellValue::text(*text),
            },
        )
        .expect("fill cell");
    }
}

/// Session whose registry holds a single fresh sheet.
pub fn session_with_sheet(name: &str, columns: &[&str]) -> Session {
    let mut session = Session::new();
    let sheet = sheet(&mut session.store, name, columns);
    session.sheets.insert(sheet.id.clone(), sheet);
    session
}

/// Assistant-message body carrying edit statements in a comment-wrapped tag,
/// the way model output arrives.
pub fn tagged(statements: &str) -> String {
    format!("Noted.\n<tableEdit><!--\n{statements}\n--></tableEdit>")
}

pub fn insert_op(table: usize, values: &[&str]) -> TableOp {
    let data: BTreeMap<usize, String> = values
        .iter()
        .enumerate()
        .map(|(col, text)| (col, text.to_string()))
        .collect();
    TableOp {
        kind: OpKind::InsertRow,
        table,
        row: None,
        data: Some(data),
    }
}

pub fn update_op(table: usize, row: usize, entries: &[(usize, &str)]) -> TableOp {
    let data: BTreeMap<usize, String> = entries
        .iter()
        .map(|(col, text)| (*col, text.to_string()))
        .collect();
    TableOp {
        kind: OpKind::UpdateRow,
        table,
        row: Some(row),
        data: Some(data),
    }
}

pub fn delete_op(table: usize, row: usize) -> TableOp {
    TableOp {
        kind: OpKind::DeleteRow,
        table,
        row: Some(row),
        data: None,
    }
}
