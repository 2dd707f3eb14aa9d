use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::{column_index, Cell, Table, XlsxError, XlsxResult};

/// Read the sheet named `sheet_name` into a header + rows table.
pub fn read_sheet<R: Read + Seek>(reader: R, sheet_name: &str) -> XlsxResult<Table> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let sheets = read_workbook_xml(&mut archive)?;
    let (_, r_id) = sheets
        .iter()
        .find(|(name, _)| name.trim() == sheet_name.trim())
        .ok_or_else(|| XlsxError::SheetNotFound(sheet_name.to_string()))?;
    read_sheet_by_rel(&mut archive, r_id)
}

/// Read whichever sheet comes first in the workbook.
pub fn read_first_sheet<R: Read + Seek>(reader: R) -> XlsxResult<Table> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let sheets = read_workbook_xml(&mut archive)?;
    let (name, r_id) = sheets
        .first()
        .ok_or_else(|| XlsxError::SheetNotFound("<first>".into()))?;
    debug!(sheet = %name, "reading first sheet");
    read_sheet_by_rel(&mut archive, r_id)
}

pub fn read_sheet_file(path: &Path, sheet_name: Option<&str>) -> XlsxResult<Table> {
    let file = File::open(path)?;
    match sheet_name {
        Some(name) => read_sheet(file, name),
        None => read_first_sheet(file),
    }
}

fn read_sheet_by_rel<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    r_id: &str,
) -> XlsxResult<Table> {
    let rels = read_workbook_rels(archive)?;
    let path = rels
        .get(r_id)
        .ok_or_else(|| XlsxError::MissingPart(format!("worksheet for relationship {}", r_id)))?
        .clone();
    let shared = read_shared_strings(archive)?;
    let cells = read_worksheet(archive, &path, &shared)?;
    Ok(into_table(cells))
}

/// `trim` suits the structural parts only; cell text keeps its spaces.
fn xml_reader<R: std::io::BufRead>(inner: R, trim: bool) -> Reader<R> {
    let mut reader = Reader::from_reader(inner);
    reader.config_mut().trim_text(trim);
    reader
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

/// Sheet names and relationship ids, in workbook order.
fn read_workbook_xml<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> XlsxResult<Vec<(String, String)>> {
    let file = archive
        .by_name("xl/workbook.xml")
        .map_err(|_| XlsxError::MissingPart("xl/workbook.xml".into()))?;
    let mut xml = xml_reader(BufReader::new(file), true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"sheet" => {
                if let (Some(name), Some(r_id)) = (attr(&e, b"name"), attr(&e, b"r:id")) {
                    sheets.push((name, r_id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship id -> worksheet part path.
fn read_workbook_rels<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> XlsxResult<HashMap<String, String>> {
    let file = archive
        .by_name("xl/_rels/workbook.xml.rels")
        .map_err(|_| XlsxError::MissingPart("xl/_rels/workbook.xml.rels".into()))?;
    let mut xml = xml_reader(BufReader::new(file), true);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id");
                let target = attr(&e, b"Target");
                let kind = attr(&e, b"Type");
                if let (Some(id), Some(target), Some(kind)) = (id, target, kind) {
                    if kind.ends_with("/worksheet") {
                        let full = match target.strip_prefix('/') {
                            Some(abs) => abs.to_string(),
                            None => format!("xl/{}", target),
                        };
                        rels.insert(id, full);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn read_shared_strings<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> XlsxResult<Vec<String>> {
    let mut strings = Vec::new();
    let file = match archive.by_name("xl/sharedStrings.xml") {
        Ok(f) => f,
        Err(_) => return Ok(strings),
    };
    let mut xml = xml_reader(BufReader::new(file), false);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(e) => match e.name().as_ref() {
                b"si" => {
                    strings.push(std::mem::take(&mut current));
                    in_si = false;
                }
                b"t" => in_t = false,
                _ => {}
            },
            Event::Text(e) if in_t => {
                let text = e.unescape().map_err(XlsxError::Xml)?;
                current.push_str(&text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

type SheetCells = BTreeMap<usize, BTreeMap<usize, Cell>>;

fn read_worksheet<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    path: &str,
    shared: &[String],
) -> XlsxResult<SheetCells> {
    let file = archive
        .by_name(path)
        .map_err(|_| XlsxError::MissingPart(path.to_string()))?;
    let mut xml = xml_reader(BufReader::new(file), false);
    let mut buf = Vec::new();
    let mut cells: SheetCells = BTreeMap::new();

    // Rows and cells without an `r` attribute follow the previous one.
    let mut row_idx: usize = 0;
    let mut next_row: usize = 0;
    let mut col_idx: usize = 0;
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut in_inline = false;
    let mut in_inline_text = false;
    let mut has_value = false;

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"row" => {
                    row_idx = attr(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .map(|r| r.saturating_sub(1))
                        .unwrap_or(next_row);
                    next_row = row_idx + 1;
                    col_idx = 0;
                }
                b"c" => {
                    if let Some(c) = attr(&e, b"r").as_deref().and_then(column_index) {
                        col_idx = c;
                    }
                    cell_type = attr(&e, b"t");
                    value.clear();
                    has_value = false;
                }
                b"v" => in_value = true,
                b"is" => in_inline = true,
                b"t" if in_inline => in_inline_text = true,
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"c" => {
                if let Some(c) = attr(&e, b"r").as_deref().and_then(column_index) {
                    col_idx = c;
                }
                col_idx += 1;
            }
            Event::Text(e) if in_value || in_inline_text => {
                value.push_str(&e.unescape().map_err(XlsxError::Xml)?);
                has_value = true;
            }
            Event::End(e) => match e.name().as_ref() {
                b"v" => in_value = false,
                b"is" => in_inline = false,
                b"t" => in_inline_text = false,
                b"c" => {
                    if has_value {
                        let cell = decode_cell(cell_type.as_deref(), &value, shared)?;
                        cells.entry(row_idx).or_default().insert(col_idx, cell);
                    }
                    col_idx += 1;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(cells)
}

fn decode_cell(cell_type: Option<&str>, value: &str, shared: &[String]) -> XlsxResult<Cell> {
    let cell = match cell_type {
        Some("s") => {
            let idx: usize = value
                .trim()
                .parse()
                .map_err(|_| XlsxError::Parse(format!("Invalid shared string index: {}", value)))?;
            let s = shared
                .get(idx)
                .ok_or_else(|| XlsxError::Parse(format!("Shared string index {} out of bounds", idx)))?;
            Cell::Text(s.clone())
        }
        Some("b") => Cell::Bool(value == "1" || value.eq_ignore_ascii_case("true")),
        Some("str") | Some("inlineStr") => Cell::Text(value.to_string()),
        Some("e") => Cell::Empty,
        None | Some("n") => match value.trim().parse::<f64>() {
            Ok(n) => Cell::Number(n),
            Err(_) => Cell::Text(value.to_string()),
        },
        Some(_) => Cell::Text(value.to_string()),
    };
    Ok(cell)
}

/// First populated row becomes the header row; the rest become data rows in
/// sheet order. Wholly empty rows are skipped.
fn into_table(cells: SheetCells) -> Table {
    let mut rows = cells.into_values();
    let headers = match rows.next() {
        Some(header) => dense(header)
            .into_iter()
            .map(|c| c.as_text().unwrap_or_default())
            .collect(),
        None => return Table::default(),
    };
    let rows = rows
        .map(dense)
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    Table { headers, rows }
}

fn dense(sparse: BTreeMap<usize, Cell>) -> Vec<Cell> {
    let width = sparse.keys().next_back().map(|k| k + 1).unwrap_or(0);
    let mut row = vec![Cell::Empty; width];
    for (col, cell) in sparse {
        row[col] = cell;
    }
    row
}
