use crate::cell::CellValue;
use crate::ids::{CellId, SheetId};
use crate::sheet::{Sheet, SheetConfig, SheetDomain, SheetKind};
use crate::store::CellStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Library of schema-only sheets. Templates own their cells in a private
/// store; instantiation copies values into the session store under fresh
/// ids, so instances never alias template cells.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TemplateSet {
    store: CellStore,
    sheets: Vec<Sheet>,
}

impl TemplateSet {
    pub fn new() -> Self {
        TemplateSet::default()
    }

    /// The stock library used when a workspace has no template file yet.
    pub fn builtin() -> Self {
        let mut set = TemplateSet::new();
        set.add_template(
            "Key Facts",
            Some("Durable facts established in the conversation. One fact per row."),
            &[
                ("Fact", Some("short statement of the fact")),
                ("Details", Some("qualifiers, numbers, caveats")),
                ("Source", Some("who said it or how it was established")),
            ],
            SheetKind::Dynamic,
        );
        set.add_template(
            "Characters",
            Some("Every named person or agent that has appeared."),
            &[
                ("Name", Some("display name")),
                ("Traits", Some("personality and notable attributes")),
                ("Status", Some("current condition or location")),
                ("Relationships", Some("ties to other characters")),
            ],
            SheetKind::Dynamic,
        );
        set.add_template(
            "Timeline",
            Some("Significant events in order of occurrence."),
            &[
                ("Time", Some("when it happened, e.g. 14:30 or 'day 3'")),
                ("Place", Some("where it happened")),
                ("Event", Some("what happened")),
            ],
            SheetKind::Dynamic,
        );
        set
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter()
    }

    pub fn get(&self, id: &SheetId) -> Option<&Sheet> {
        self.sheets.iter().find(|s| &s.id == id)
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    /// Registers a new template and returns its id.
    pub fn add_template(
        &mut self,
        name: &str,
        prompt: Option<&str>,
        columns: &[(&str, Option<&str>)],
        kind: SheetKind,
    ) -> SheetId {
        let columns: Vec<(String, Option<String>)> = columns
            .iter()
            .map(|(title, desc)| (title.to_string(), desc.map(str::to_string)))
            .collect();
        let mut sheet = Sheet::with_schema(
            &mut self.store,
            name,
            prompt,
            &columns,
            kind,
            SheetDomain::Global,
        );
        sheet.is_template = true;
        let id = sheet.id.clone();
        self.sheets.push(sheet);
        id
    }

    /// Builds a bound instance of one template inside `store`. Every cell is
    /// reallocated, so the instance carries fresh ids and empty history.
    pub fn instantiate(&self, template: &Sheet, store: &mut CellStore) -> Sheet {
        let id = SheetId::generate();
        let grid: Vec<Vec<CellId>> = template
            .grid
            .iter()
            .enumerate()
            .map(|(row, ids)| {
                ids.iter()
                    .enumerate()
                    .map(|(col, cell_id)| {
                        let value = self
                            .store
                            .get(cell_id)
                            .map(|c| c.value.clone())
                            .unwrap_or_else(CellValue::default);
                        store.allocate(&id, row, col, value)
                    })
                    .collect()
            })
            .collect();
        debug!(template = %template.id, instance = %id, "template instantiated");
        Sheet {
            id,
            kind: template.kind,
            domain: SheetDomain::Chat,
            is_template: false,
            template: Some(template.id.clone()),
            grid,
            config: SheetConfig {
                include_in_prompt: template.config.include_in_prompt,
                update_every_n: template.config.update_every_n,
                display_style: template.config.display_style.clone(),
                note: template.config.note.clone(),
            },
            markers: Default::default(),
        }
    }

    pub fn instantiate_all(&self, store: &mut CellStore) -> Vec<Sheet> {
        self.sheets
            .iter()
            .map(|template| self.instantiate(template, store))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_are_schema_only() {
        let set = TemplateSet::builtin();
        assert_eq!(set.len(), 3);
        for template in set.iter() {
            assert!(template.is_template);
            assert_eq!(template.rows(), 1);
            assert!(template.cols() >= 2);
        }
    }

    #[test]
    fn instances_get_fresh_ids_and_copied_schema() {
        let set = TemplateSet::builtin();
        let template = set.iter().next().unwrap();
        let mut store = CellStore::new();
        let instance = set.instantiate(template, &mut store);

        assert!(!instance.is_template);
        assert_eq!(instance.template.as_ref(), Some(&template.id));
        assert_ne!(instance.id, template.id);
        assert_eq!(
            instance.column_titles(&store),
            template.column_titles(set.store())
        );
        for id in instance.grid.iter().flatten() {
            assert!(store.contains(id));
            assert!(!set.store().contains(id));
        }
    }

    #[test]
    fn template_set_serde_round_trip() {
        let set = TemplateSet::builtin();
        let json = serde_json::to_string(&set).unwrap();
        let restored: TemplateSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), set.len());
        let names: Vec<String> = restored
            .iter()
            .map(|s| s.name(restored.store()))
            .collect();
        assert!(names.contains(&"Key Facts".to_string()));
    }
}
