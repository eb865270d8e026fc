//! Resource tagging: builds the resource table from everything compiled,
//! rewrites class and fragment definitions to indices, and resolves every
//! symbolic reference.
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

use cook_formats::defs::{TaggedClass, TaggedFragment};
use cook_formats::resource_table::{ResourceKind, ResourceTable};
use map_source::{ClassDef, FragmentDef};
use tracing::{debug, warn};

use crate::error::CookError;
use crate::unit::{read_source, resource_name, walk_files, OutputFile, ResourceRef};

pub const RESOURCE_TABLE_FILE: &str = "resources.tbl";
const DEFINITION_EXTENSION: &str = "toml";

/// Names of every compiled (or discovered) resource, by kind, with the
/// source that provides each.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: BTreeMap<(ResourceKind, String), String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` as provided by `origin`. Each name is provided at most
    /// once per kind.
    pub fn register(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        origin: &str,
    ) -> Result<(), CookError> {
        match self.entries.entry((kind, name.into())) {
            Entry::Vacant(slot) => {
                slot.insert(origin.to_string());
                Ok(())
            }
            Entry::Occupied(slot) => Err(CookError::validation(
                origin,
                format!(
                    "duplicate {} name '{}' (already provided by '{}')",
                    kind,
                    slot.key().1,
                    slot.get()
                ),
            )),
        }
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.entries.contains_key(&(kind, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn table(&self) -> ResourceTable {
        ResourceTable::from_names(self.entries.keys().map(|(kind, name)| (*kind, name.as_str())))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tagged {
    pub table: ResourceTable,
    pub classes: Vec<TaggedClass>,
    pub fragments: Vec<TaggedFragment>,
}

impl Tagged {
    /// `resources.tbl` plus one file per class and fragment, relative to the
    /// destination root.
    pub fn outputs(
        &self,
        classes_dir: &str,
        fragments_dir: &str,
    ) -> Result<Vec<OutputFile>, CookError> {
        let encode_err = |err| CookError::validation("resource tagger", err);
        let mut outputs = vec![OutputFile::new(
            RESOURCE_TABLE_FILE,
            self.table.encode().map_err(encode_err)?,
        )];
        for class in &self.classes {
            outputs.push(OutputFile::new(
                format!("{}/{}.class", classes_dir, class.name),
                class.encode().map_err(encode_err)?,
            ));
        }
        for fragment in &self.fragments {
            outputs.push(OutputFile::new(
                format!("{}/{}.frag", fragments_dir, fragment.name),
                fragment.encode().map_err(encode_err)?,
            ));
        }
        Ok(outputs)
    }
}

/// Builds the table from `inventory` and resolves `external_refs` plus every
/// name used by the definitions. Output order is sorted by name, so equal
/// inputs tag identically.
pub fn tag(
    inventory: &Inventory,
    class_defs: &[ClassDef],
    frag_defs: &[FragmentDef],
    external_refs: &[ResourceRef],
) -> Result<Tagged, CookError> {
    let table = inventory.table();
    check_references(&table, external_refs)?;

    let mut frag_defs: Vec<&FragmentDef> = frag_defs.iter().collect();
    frag_defs.sort_by(|a, b| a.name.cmp(&b.name));
    check_names("fragment", frag_defs.iter().map(|def| def.name.as_str()))?;
    let mut fragments = Vec::with_capacity(frag_defs.len());
    for def in &frag_defs {
        let referrer = format!("fragment '{}'", def.name);
        fragments.push(TaggedFragment {
            name: def.name.clone(),
            model: resolve_optional(&table, ResourceKind::Model, def.model.as_deref(), &referrer)?,
            texture: resolve_optional(
                &table,
                ResourceKind::Texture,
                def.texture.as_deref(),
                &referrer,
            )?,
            sound: resolve_optional(&table, ResourceKind::Sound, def.sound.as_deref(), &referrer)?,
            mass: def.mass,
        });
    }

    let mut class_defs: Vec<&ClassDef> = class_defs.iter().collect();
    class_defs.sort_by(|a, b| a.name.cmp(&b.name));
    check_names("class", class_defs.iter().map(|def| def.name.as_str()))?;
    let mut classes = Vec::with_capacity(class_defs.len());
    for def in &class_defs {
        let referrer = format!("class '{}'", def.name);
        let resolve_all = |kind, names: &[String]| -> Result<Vec<u32>, CookError> {
            names
                .iter()
                .map(|name| resolve(&table, kind, name, &referrer))
                .collect()
        };
        let fragment_links = def
            .fragments
            .iter()
            .map(|name| {
                frag_defs
                    .binary_search_by(|frag| frag.name.cmp(name))
                    .map(|index| index as u32)
                    .map_err(|_| dangling(&referrer, "fragment", name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        classes.push(TaggedClass {
            name: def.name.clone(),
            model: resolve_optional(&table, ResourceKind::Model, def.model.as_deref(), &referrer)?,
            health: def.health,
            textures: resolve_all(ResourceKind::Texture, &def.textures)?,
            sounds: resolve_all(ResourceKind::Sound, &def.sounds)?,
            fragments: fragment_links,
        });
    }

    debug!(
        textures = table.names(ResourceKind::Texture).len(),
        models = table.names(ResourceKind::Model).len(),
        sounds = table.names(ResourceKind::Sound).len(),
        classes = classes.len(),
        fragments = fragments.len(),
        "resources tagged"
    );
    Ok(Tagged {
        table,
        classes,
        fragments,
    })
}

/// Fails on the first reference with no entry in `table`.
pub fn check_references(table: &ResourceTable, refs: &[ResourceRef]) -> Result<(), CookError> {
    for reference in refs {
        resolve(table, reference.kind, &reference.name, &reference.referrer)?;
    }
    Ok(())
}

/// Parses every definition under the two directories in sorted path order.
/// Missing directories hold no definitions.
pub fn load_definitions(
    classes_dir: &Path,
    fragments_dir: &Path,
) -> Result<(Vec<ClassDef>, Vec<FragmentDef>), CookError> {
    let mut classes = Vec::new();
    for (label, text) in read_definitions(classes_dir, "class")? {
        let def = ClassDef::parse_toml(&text).map_err(|err| CookError::validation(&label, err))?;
        report(&label, def.validate())?;
        classes.push(def);
    }
    let mut fragments = Vec::new();
    for (label, text) in read_definitions(fragments_dir, "fragment")? {
        let def = FragmentDef::parse_toml(&text).map_err(|err| CookError::validation(&label, err))?;
        report(&label, def.validate())?;
        fragments.push(def);
    }
    Ok((classes, fragments))
}

fn read_definitions(dir: &Path, what: &str) -> Result<Vec<(String, String)>, CookError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut sources = Vec::new();
    for path in walk_files(dir, true)? {
        let is_definition = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(DEFINITION_EXTENSION))
            .unwrap_or(false);
        if !is_definition {
            continue;
        }
        let label = format!("{} source '{}'", what, resource_name(dir, &path));
        let text = read_source(&path, &label)?;
        sources.push((label, text));
    }
    Ok(sources)
}

fn report(label: &str, validation: map_source::SourceValidation) -> Result<(), CookError> {
    let warnings = validation
        .into_result()
        .map_err(|err| CookError::validation(label, err))?;
    for warning in warnings {
        warn!(unit = label, "{}", warning);
    }
    Ok(())
}

fn check_names<'a>(what: &str, sorted: impl Iterator<Item = &'a str>) -> Result<(), CookError> {
    let mut previous: Option<&str> = None;
    for name in sorted {
        let plain = !name.is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        if !plain {
            return Err(CookError::validation(
                format!("{} '{}'", what, name),
                "name must be a plain file name",
            ));
        }
        if previous == Some(name) {
            return Err(CookError::validation(
                format!("{} '{}'", what, name),
                "defined more than once",
            ));
        }
        previous = Some(name);
    }
    Ok(())
}

fn resolve(
    table: &ResourceTable,
    kind: ResourceKind,
    name: &str,
    referrer: &str,
) -> Result<u32, CookError> {
    table
        .index(kind, name)
        .ok_or_else(|| dangling(referrer, kind.label(), name))
}

fn resolve_optional(
    table: &ResourceTable,
    kind: ResourceKind,
    name: Option<&str>,
    referrer: &str,
) -> Result<Option<u32>, CookError> {
    name.map(|name| resolve(table, kind, name, referrer)).transpose()
}

fn dangling(referrer: &str, what: &str, name: &str) -> CookError {
    CookError::validation(referrer, format!("references unknown {} '{}'", what, name))
}
