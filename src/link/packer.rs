// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Import graph resolution and program layout.
//!
//! `load_modules` walks the import graph depth-first from the entry file
//! and parses each module exactly once, keyed by canonical path. The load
//! order is dependency-first, so an importer's exports are available by
//! the time it is lowered and the entry module comes last. `pack` then
//! lays the lowered items into the byte image (code in load order, then
//! data, then var) and builds the global symbol table consumed by the
//! fixup resolver and the artifact writers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codegen::lower::{LoweredModule, Placement};
use crate::core::diag::{CompileError, Diagnostic, ErrorKind, Severity};
use crate::core::image::ByteImage;
use crate::core::options::CompileOptions;
use crate::core::span::Span;
use crate::core::symtab::{Symbol, SymbolKind, SymbolTable};
use crate::frontend::ast::{ImportDecl, Module};
use crate::frontend::parser::parse_source;

/// A parsed module plus the load-order indices of the modules it imports.
#[derive(Debug)]
pub struct SourceModule {
    pub module: Module,
    pub imports: Vec<usize>,
    pub text: String,
}

/// Parse the entry file and everything it transitively imports.
///
/// Each distinct canonical path is read and parsed once; a second import
/// of the same file resolves to the already loaded module. Import cycles
/// are reported at the back-edge import statement and the edge is
/// dropped, so the rest of the graph still loads.
pub fn load_modules(entry: &Path, options: &CompileOptions) -> (Vec<SourceModule>, Vec<Diagnostic>) {
    let display = entry.display().to_string();
    let canon = match fs::canonicalize(entry) {
        Ok(path) => path,
        Err(_) => {
            let err = CompileError::new(ErrorKind::Io, "Cannot read input file", Some(&display));
            return (Vec::new(), vec![Diagnostic::new(1, Severity::Error, err)]);
        }
    };
    let root = canon.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut loader = Loader {
        options,
        root,
        states: BTreeMap::new(),
        modules: Vec::new(),
        stack: Vec::new(),
        diags: Vec::new(),
    };
    match fs::read_to_string(&canon) {
        Ok(text) => {
            loader.load_file(canon, text);
        }
        Err(_) => {
            let err = CompileError::new(ErrorKind::Io, "Cannot read input file", Some(&display));
            loader.diags.push(Diagnostic::new(1, Severity::Error, err));
        }
    }
    (loader.modules, loader.diags)
}

enum LoadState {
    Loading,
    Loaded(usize),
    Failed,
}

struct Loader<'a> {
    options: &'a CompileOptions,
    root: PathBuf,
    states: BTreeMap<PathBuf, LoadState>,
    modules: Vec<SourceModule>,
    /// Rel-path chain of modules currently being loaded, for notes.
    stack: Vec<String>,
    diags: Vec<Diagnostic>,
}

impl Loader<'_> {
    fn load_file(&mut self, canon: PathBuf, text: String) -> usize {
        let rel = project_rel(&self.root, &canon);
        let (module, parse_diags) = parse_source(&canon, &rel, &text, self.options);
        self.diags.extend(parse_diags);

        self.states.insert(canon.clone(), LoadState::Loading);
        self.stack.push(rel.clone());
        let decls: Vec<ImportDecl> = module.imports().cloned().collect();
        let mut imports = Vec::new();
        for decl in &decls {
            if let Some(idx) = self.resolve_import(&canon, &rel, decl) {
                imports.push(idx);
            }
        }
        self.stack.pop();

        let idx = self.modules.len();
        self.modules.push(SourceModule {
            module,
            imports,
            text,
        });
        self.states.insert(canon, LoadState::Loaded(idx));
        idx
    }

    fn resolve_import(&mut self, from: &Path, from_rel: &str, decl: &ImportDecl) -> Option<usize> {
        let rel = PathBuf::from(format!("{}.zax", decl.path));
        let mut candidates = Vec::new();
        if let Some(dir) = from.parent() {
            candidates.push(dir.join(&rel));
        }
        for dir in &self.options.include_dirs {
            candidates.push(dir.join(&rel));
        }
        let Some(found) = candidates.into_iter().find(|c| c.is_file()) else {
            let err = CompileError::new(ErrorKind::Io, "Import not found", Some(&decl.path));
            self.push_diag(decl.span, from_rel, err);
            return None;
        };

        let canon = match fs::canonicalize(&found) {
            Ok(path) => path,
            Err(_) => {
                let display = found.display().to_string();
                let err =
                    CompileError::new(ErrorKind::Io, "Cannot read source file", Some(&display));
                self.push_diag(decl.span, from_rel, err);
                return None;
            }
        };
        match self.states.get(&canon) {
            Some(LoadState::Loaded(idx)) => return Some(*idx),
            Some(LoadState::Failed) => return None,
            Some(LoadState::Loading) => {
                let err =
                    CompileError::new(ErrorKind::Semantic, "Import cycle detected", Some(&decl.path));
                self.push_diag(decl.span, from_rel, err);
                return None;
            }
            None => {}
        }

        let text = match fs::read_to_string(&canon) {
            Ok(text) => text,
            Err(_) => {
                self.states.insert(canon, LoadState::Failed);
                let display = found.display().to_string();
                let err =
                    CompileError::new(ErrorKind::Io, "Cannot read source file", Some(&display));
                self.push_diag(decl.span, from_rel, err);
                return None;
            }
        };
        Some(self.load_file(canon, text))
    }

    fn push_diag(&mut self, span: Span, file: &str, err: CompileError) {
        let mut diag =
            Diagnostic::at(span, Severity::Error, err).with_file(Some(file.to_string()));
        if self.stack.len() > 1 {
            diag = diag.with_note(format!("import stack: {}", self.stack.join(" -> ")));
        }
        self.diags.push(diag);
    }
}

/// Project-relative forward-slash form of `path`. Files outside the
/// project root (include-dir imports) keep their full path.
fn project_rel(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            parts.join("/")
        }
        Err(_) => path.display().to_string().replace('\\', "/"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Code,
    Data,
    Var,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Code => "code",
            ItemKind::Data => "data",
            ItemKind::Var => "var",
        }
    }
}

/// One laid-out item. `index` points into the owning module's
/// funcs/datas/vars vector according to `kind`. Items skipped because
/// their placement failed do not appear.
#[derive(Debug, Clone)]
pub struct PlacedItem {
    pub module: usize,
    pub index: usize,
    pub kind: ItemKind,
    pub base: u16,
    pub size: u16,
    pub section: Option<String>,
}

/// The packed program: every placed item, the byte image with code and
/// data written (vars only reserve addresses), and the global symbol
/// table. `entry` names the exported `main` of the entry module when
/// one exists.
#[derive(Debug)]
pub struct PackedProgram {
    pub modules: Vec<LoweredModule>,
    pub items: Vec<PlacedItem>,
    pub image: ByteImage,
    pub symbols: SymbolTable,
    pub entry: Option<(String, u16)>,
}

impl PackedProgram {
    /// Base address of a placed item, if its placement succeeded.
    pub fn item_base(&self, module: usize, kind: ItemKind, index: usize) -> Option<u16> {
        self.items
            .iter()
            .find(|it| it.module == module && it.kind == kind && it.index == index)
            .map(|it| it.base)
    }
}

/// Lay out all lowered modules and build the symbol table.
///
/// Code items flow from address 0 in load order, data items follow, var
/// items last. `align` rounds the cursor up, `at` pins an item and the
/// flow continues after it. An item whose base is out of range is
/// skipped without moving the cursor so later items do not inherit the
/// bad address; an overlapping item is skipped but still advances the
/// cursor past its would-be extent.
pub fn pack(modules: Vec<LoweredModule>) -> (PackedProgram, Vec<Diagnostic>) {
    let mut diags = Vec::new();
    let mut layout = Layout {
        cursor: 0,
        image: ByteImage::new(),
        items: Vec::new(),
        placed: Vec::new(),
    };
    let mut symbols = SymbolTable::new();

    for (mi, module) in modules.iter().enumerate() {
        for (fi, func) in module.funcs.iter().enumerate() {
            let base = layout.place(
                &mut diags,
                ItemSite {
                    module: mi,
                    index: fi,
                    kind: ItemKind::Code,
                    name: &func.name,
                    span: func.span,
                    file: &module.rel_path,
                },
                func.bytes.len() as u16,
                Some(&func.bytes),
                &func.placements,
            );
            let Some(base) = base else { continue };
            define(
                &mut symbols,
                &mut diags,
                Symbol {
                    name: func.name.clone(),
                    kind: SymbolKind::Function,
                    address: base,
                    scope: String::new(),
                    file: module.rel_path.clone(),
                    line: func.span.line,
                    size: func.bytes.len() as u16,
                    exported: func.exported,
                },
                func.span,
            );
            for label in &func.labels {
                define(
                    &mut symbols,
                    &mut diags,
                    Symbol {
                        name: label.name.clone(),
                        kind: SymbolKind::Label,
                        address: base.wrapping_add(label.offset as u16),
                        scope: func.name.clone(),
                        file: module.rel_path.clone(),
                        line: label.span.line,
                        size: 0,
                        exported: false,
                    },
                    label.span,
                );
            }
        }
    }

    for (mi, module) in modules.iter().enumerate() {
        for (di, data) in module.datas.iter().enumerate() {
            let base = layout.place(
                &mut diags,
                ItemSite {
                    module: mi,
                    index: di,
                    kind: ItemKind::Data,
                    name: &data.name,
                    span: data.span,
                    file: &module.rel_path,
                },
                data.bytes.len() as u16,
                Some(&data.bytes),
                &data.placements,
            );
            let Some(base) = base else { continue };
            define(
                &mut symbols,
                &mut diags,
                Symbol {
                    name: data.name.clone(),
                    kind: SymbolKind::Data,
                    address: base,
                    scope: String::new(),
                    file: module.rel_path.clone(),
                    line: data.span.line,
                    size: data.bytes.len() as u16,
                    exported: data.exported,
                },
                data.span,
            );
        }
    }

    for (mi, module) in modules.iter().enumerate() {
        for (vi, var) in module.vars.iter().enumerate() {
            let base = layout.place(
                &mut diags,
                ItemSite {
                    module: mi,
                    index: vi,
                    kind: ItemKind::Var,
                    name: &var.name,
                    span: var.span,
                    file: &module.rel_path,
                },
                var.size,
                None,
                &var.placements,
            );
            let Some(base) = base else { continue };
            define(
                &mut symbols,
                &mut diags,
                Symbol {
                    name: var.name.clone(),
                    kind: SymbolKind::Var,
                    address: base,
                    scope: String::new(),
                    file: module.rel_path.clone(),
                    line: var.span.line,
                    size: var.size,
                    exported: var.exported,
                },
                var.span,
            );
        }
    }

    // Constants outside the address range stay compile-time only.
    for module in &modules {
        for c in &module.consts {
            if !(0..=0xFFFF).contains(&c.value) {
                continue;
            }
            define(
                &mut symbols,
                &mut diags,
                Symbol {
                    name: c.name.clone(),
                    kind: SymbolKind::Constant,
                    address: c.value as u16,
                    scope: String::new(),
                    file: module.rel_path.clone(),
                    line: c.span.line,
                    size: 0,
                    exported: c.exported,
                },
                c.span,
            );
        }
    }

    let entry = modules.last().and_then(|entry_mod| {
        let mi = modules.len() - 1;
        entry_mod
            .funcs
            .iter()
            .enumerate()
            .find(|(_, f)| f.exported && f.name == "main")
            .and_then(|(fi, f)| {
                layout
                    .items
                    .iter()
                    .find(|it| it.module == mi && it.kind == ItemKind::Code && it.index == fi)
                    .map(|it| (f.name.clone(), it.base))
            })
    });

    let program = PackedProgram {
        modules,
        items: layout.items,
        image: layout.image,
        symbols,
        entry,
    };
    (program, diags)
}

fn define(symbols: &mut SymbolTable, diags: &mut Vec<Diagnostic>, sym: Symbol, span: Span) {
    let file = sym.file.clone();
    if let Err(err) = symbols.define(sym) {
        diags.push(Diagnostic::at(span, Severity::Error, err).with_file(Some(file)));
    }
}

struct ItemSite<'a> {
    module: usize,
    index: usize,
    kind: ItemKind,
    name: &'a str,
    span: Span,
    file: &'a str,
}

struct Layout {
    cursor: u32,
    image: ByteImage,
    items: Vec<PlacedItem>,
    /// Inclusive occupied ranges, for overlap checks against both
    /// written bytes and var reservations.
    placed: Vec<(u32, u32, String)>,
}

impl Layout {
    fn place(
        &mut self,
        diags: &mut Vec<Diagnostic>,
        site: ItemSite<'_>,
        size: u16,
        bytes: Option<&[u8]>,
        placements: &[Placement],
    ) -> Option<u16> {
        let mut section = None;
        let mut base = self.cursor;
        for placement in placements {
            match placement {
                Placement::Section(name) => section = Some(name.clone()),
                Placement::Align(align) => base = align_up(base, u32::from(*align)),
                Placement::At(addr) => base = u32::from(*addr),
            }
        }

        let size = u32::from(size);
        if base > 0xFFFF || base + size > 0x1_0000 {
            let msg =
                format!("\"{}\" base address out of range (0x{base:04X} + {size} bytes)", site.name);
            let err = CompileError::new(ErrorKind::Emission, &msg, None);
            diags.push(
                Diagnostic::at(site.span, Severity::Error, err)
                    .with_file(Some(site.file.to_string())),
            );
            return None;
        }
        if size == 0 {
            self.items.push(PlacedItem {
                module: site.module,
                index: site.index,
                kind: site.kind,
                base: base as u16,
                size: 0,
                section,
            });
            return Some(base as u16);
        }

        let end = base + size - 1;
        if let Some(addr) = self.first_overlap(base, end) {
            let msg = format!("Byte overlap at 0x{addr:04X} while placing \"{}\"", site.name);
            let err = CompileError::new(ErrorKind::Emission, &msg, None);
            diags.push(
                Diagnostic::at(site.span, Severity::Error, err)
                    .with_file(Some(site.file.to_string())),
            );
            self.cursor = end + 1;
            return None;
        }

        if let Some(bytes) = bytes {
            self.image.write_bytes(base, bytes);
        }
        self.placed.push((base, end, site.name.to_string()));
        self.items.push(PlacedItem {
            module: site.module,
            index: site.index,
            kind: site.kind,
            base: base as u16,
            size: size as u16,
            section,
        });
        self.cursor = end + 1;
        Some(base as u16)
    }

    fn first_overlap(&self, start: u32, end: u32) -> Option<u32> {
        self.placed
            .iter()
            .filter(|(s, e, _)| start <= *e && *s <= end)
            .map(|(s, _, _)| start.max(*s))
            .min()
    }
}

fn align_up(addr: u32, align: u32) -> u32 {
    (addr + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn create_temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("target")
            .join(format!("test-{label}-{}-{nanos}", process::id()));
        fs::create_dir_all(&dir).expect("Create temp dir");
        dir
    }

    fn write_file(path: &Path, contents: &str) {
        fs::write(path, contents).expect("Write test file");
    }

    fn code(name: &str, bytes: Vec<u8>, placements: Vec<Placement>) -> crate::codegen::lower::LoweredFunc {
        crate::codegen::lower::LoweredFunc {
            name: name.to_string(),
            exported: true,
            span: Span::point(1, 1),
            bytes,
            fixups: Vec::new(),
            labels: Vec::new(),
            records: Vec::new(),
            placements,
        }
    }

    fn data(name: &str, bytes: Vec<u8>, placements: Vec<Placement>) -> crate::codegen::lower::LoweredData {
        crate::codegen::lower::LoweredData {
            name: name.to_string(),
            exported: false,
            span: Span::point(2, 1),
            bytes,
            fixups: Vec::new(),
            placements,
        }
    }

    fn var(name: &str, size: u16) -> crate::codegen::lower::LoweredVar {
        crate::codegen::lower::LoweredVar {
            name: name.to_string(),
            exported: false,
            span: Span::point(3, 1),
            size,
            placements: Vec::new(),
        }
    }

    fn module(
        rel: &str,
        funcs: Vec<crate::codegen::lower::LoweredFunc>,
        datas: Vec<crate::codegen::lower::LoweredData>,
        vars: Vec<crate::codegen::lower::LoweredVar>,
    ) -> LoweredModule {
        LoweredModule {
            path: PathBuf::from(rel),
            rel_path: rel.to_string(),
            consts: Vec::new(),
            funcs,
            datas,
            vars,
        }
    }

    fn errors(diags: &[Diagnostic]) -> Vec<String> {
        diags
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .map(|d| d.message().to_string())
            .collect()
    }

    #[test]
    fn layout_orders_code_then_data_then_var() {
        let m = module(
            "main.zax",
            vec![code("main", vec![0x3E, 0x01, 0xC9], Vec::new())],
            vec![data("msg", vec![b'h', b'i', 0], Vec::new())],
            vec![var("cursor", 2)],
        );
        let (program, diags) = pack(vec![m]);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));

        let bases: Vec<(ItemKind, u16)> = program.items.iter().map(|it| (it.kind, it.base)).collect();
        assert_eq!(
            bases,
            vec![(ItemKind::Code, 0), (ItemKind::Data, 3), (ItemKind::Var, 6)]
        );
        // Vars reserve addresses but write nothing.
        assert_eq!(program.image.len(), 6);
        assert_eq!(program.symbols.lookup("cursor").map(|s| s.address), Some(6));
        assert_eq!(program.entry, Some(("main".to_string(), 0)));
    }

    #[test]
    fn at_pins_an_item_and_flow_continues_after_it() {
        let m = module(
            "main.zax",
            vec![
                code("boot", vec![0x00, 0x00], Vec::new()),
                code("irq", vec![0xC9], vec![Placement::At(0x0066)]),
                code("main", vec![0xC9], Vec::new()),
            ],
            Vec::new(),
            Vec::new(),
        );
        let (program, diags) = pack(vec![m]);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        assert_eq!(program.item_base(0, ItemKind::Code, 0), Some(0));
        assert_eq!(program.item_base(0, ItemKind::Code, 1), Some(0x0066));
        assert_eq!(program.item_base(0, ItemKind::Code, 2), Some(0x0067));
    }

    #[test]
    fn align_rounds_the_cursor_up() {
        let m = module(
            "main.zax",
            vec![code("main", vec![0xC9], Vec::new())],
            vec![data("tab", vec![1, 2, 3, 4], vec![Placement::Align(16)])],
            Vec::new(),
        );
        let (program, diags) = pack(vec![m]);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        assert_eq!(program.item_base(0, ItemKind::Data, 0), Some(16));
    }

    #[test]
    fn section_tag_is_recorded_on_the_next_item() {
        let m = module(
            "main.zax",
            vec![code(
                "nmi",
                vec![0xC9],
                vec![Placement::Section("vectors".to_string()), Placement::At(0x0066)],
            )],
            Vec::new(),
            Vec::new(),
        );
        let (program, diags) = pack(vec![m]);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        assert_eq!(program.items[0].section.as_deref(), Some("vectors"));
    }

    #[test]
    fn overlapping_items_are_diagnosed_and_skipped() {
        let m = module(
            "main.zax",
            vec![
                code("a", vec![0; 4], vec![Placement::At(0x0100)]),
                code("b", vec![0xC9, 0xC9], vec![Placement::At(0x0102)]),
            ],
            Vec::new(),
            Vec::new(),
        );
        let (program, diags) = pack(vec![m]);
        let errs = errors(&diags);
        assert_eq!(errs, vec!["Byte overlap at 0x0102 while placing \"b\""]);
        assert_eq!(program.item_base(0, ItemKind::Code, 1), None);
        assert!(program.symbols.lookup("b").is_none());
    }

    #[test]
    fn out_of_range_base_does_not_cascade() {
        let m = module(
            "main.zax",
            vec![code("main", vec![0xC9], Vec::new())],
            vec![
                data("tab", vec![1, 2], vec![Placement::At(0xFFFF)]),
                data("ok", vec![3], Vec::new()),
            ],
            Vec::new(),
        );
        let (program, diags) = pack(vec![m]);
        let errs = errors(&diags);
        assert_eq!(
            errs,
            vec!["\"tab\" base address out of range (0xFFFF + 2 bytes)"]
        );
        // The cursor stays put, so the next item lands right after main.
        assert_eq!(program.item_base(0, ItemKind::Data, 1), Some(1));
    }

    #[test]
    fn duplicate_symbol_across_modules_is_reported() {
        let lib = module(
            "lib.zax",
            vec![code("draw", vec![0xC9], Vec::new())],
            Vec::new(),
            Vec::new(),
        );
        let main = module(
            "main.zax",
            vec![code("draw", vec![0xC9], Vec::new())],
            Vec::new(),
            Vec::new(),
        );
        let (_, diags) = pack(vec![lib, main]);
        assert_eq!(errors(&diags), vec!["Duplicate symbol: draw"]);
    }

    #[test]
    fn entry_is_the_last_modules_exported_main() {
        let lib = module(
            "lib.zax",
            vec![code("main", vec![0xC9], Vec::new())],
            Vec::new(),
            Vec::new(),
        );
        // lib's main is not the entry; only the last module counts.
        let mut entry_func = code("main", vec![0xC9], Vec::new());
        entry_func.name = "start".to_string();
        let main = module("main.zax", vec![entry_func], Vec::new(), Vec::new());
        let (program, diags) = pack(vec![lib, main]);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        assert_eq!(program.entry, None);
    }

    #[test]
    fn loader_orders_imports_before_importers() {
        let dir = create_temp_dir("loader-order");
        write_file(
            &dir.join("main.zax"),
            "import lib\nexport func main(): void\n  ret\nend\n",
        );
        write_file(
            &dir.join("lib.zax"),
            "export func five(): byte\n  ld a, 5\n  ret\nend\n",
        );

        let options = CompileOptions::default();
        let (modules, diags) = load_modules(&dir.join("main.zax"), &options);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        let order: Vec<&str> = modules.iter().map(|m| m.module.rel_path.as_str()).collect();
        assert_eq!(order, vec!["lib.zax", "main.zax"]);
        assert_eq!(modules[1].imports, vec![0]);
    }

    #[test]
    fn shared_import_is_loaded_once() {
        let dir = create_temp_dir("loader-shared");
        write_file(
            &dir.join("main.zax"),
            "import a\nimport b\nexport func main(): void\n  ret\nend\n",
        );
        write_file(&dir.join("a.zax"), "import util\n");
        write_file(&dir.join("b.zax"), "import util\n");
        write_file(&dir.join("util.zax"), "export const Max = 16\n");

        let options = CompileOptions::default();
        let (modules, diags) = load_modules(&dir.join("main.zax"), &options);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        assert_eq!(modules.len(), 4);
        let order: Vec<&str> = modules.iter().map(|m| m.module.rel_path.as_str()).collect();
        assert_eq!(order, vec!["util.zax", "a.zax", "b.zax", "main.zax"]);
        // Both a and b point at the same util index.
        assert_eq!(modules[1].imports, vec![0]);
        assert_eq!(modules[2].imports, vec![0]);
    }

    #[test]
    fn import_cycle_is_reported_once_at_the_back_edge() {
        let dir = create_temp_dir("loader-cycle");
        write_file(
            &dir.join("main.zax"),
            "import lib\nexport func main(): void\n  ret\nend\n",
        );
        write_file(&dir.join("lib.zax"), "import main\n");

        let options = CompileOptions::default();
        let (modules, diags) = load_modules(&dir.join("main.zax"), &options);
        let errs = errors(&diags);
        assert_eq!(errs, vec!["Import cycle detected: main"]);
        let cycle = diags
            .iter()
            .find(|d| d.message().starts_with("Import cycle"))
            .expect("cycle diagnostic");
        assert_eq!(cycle.file(), Some("lib.zax"));
        // Both modules still load so later phases can run.
        assert_eq!(modules.len(), 2);
    }

    #[test]
    fn missing_import_is_an_io_diagnostic() {
        let dir = create_temp_dir("loader-missing");
        write_file(
            &dir.join("main.zax"),
            "import gone\nexport func main(): void\n  ret\nend\n",
        );

        let options = CompileOptions::default();
        let (modules, diags) = load_modules(&dir.join("main.zax"), &options);
        assert_eq!(errors(&diags), vec!["Import not found: gone"]);
        assert_eq!(diags[0].code(), "zax701");
        assert_eq!(modules.len(), 1);
    }

    #[test]
    fn include_dirs_are_searched_after_the_importing_file() {
        let dir = create_temp_dir("loader-include");
        let extra = dir.join("vendor");
        fs::create_dir_all(&extra).expect("Create include dir");
        write_file(
            &dir.join("main.zax"),
            "import gfx\nexport func main(): void\n  ret\nend\n",
        );
        write_file(&extra.join("gfx.zax"), "export const Rows = 24\n");

        let options = CompileOptions {
            include_dirs: vec![extra],
            ..CompileOptions::default()
        };
        let (modules, diags) = load_modules(&dir.join("main.zax"), &options);
        assert!(errors(&diags).is_empty(), "{:?}", errors(&diags));
        assert_eq!(modules.len(), 2);
    }
}
