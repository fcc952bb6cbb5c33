//! Test fixture generator for office-to-pdf.
//!
//! Writes an input tree of Word, Excel and CSV documents plus a matching
//! configuration file under `tests/fixtures/output`, for the integration tests
//! and for trying the converter by hand.

use anyhow::Result;
use docx_rs::{
    AlignmentType, BreakType, Docx, Paragraph, Run, Table as DocxTable, TableCell, TableRow,
};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

fn main() -> Result<()> {
    let output_dir = Path::new("tests/fixtures/output");
    fs::create_dir_all(output_dir)?;

    println!("Generating test fixtures...\n");

    let word = output_dir.join("word");
    fs::create_dir_all(&word)?;
    generate_simple_docx(&word)?;
    generate_multiscript_docx(&word)?;
    generate_multipage_docx(&word)?;
    generate_tables_docx(&word)?;

    let reports = output_dir.join("excel/reports");
    fs::create_dir_all(&reports)?;
    generate_report_xlsx(&reports)?;
    generate_yearly_xlsx(&reports)?;
    generate_ledger_csv(&output_dir.join("excel"))?;

    let errors = output_dir.join("errors");
    fs::create_dir_all(&errors)?;
    generate_corrupt_docx(&errors)?;

    generate_config(output_dir)?;

    println!("\nAll fixtures generated successfully!");
    Ok(())
}

fn paragraph(text: &str) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(text))
}

fn heading(text: &str, size: usize) -> Paragraph {
    Paragraph::new()
        .add_run(Run::new().add_text(text).bold().size(size))
        .align(AlignmentType::Center)
}

/// Generate a simple single-paragraph DOCX.
fn generate_simple_docx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("simple.docx");
    println!("  Creating: {}", path.display());

    let docx = Docx::new()
        .add_paragraph(paragraph("Hello, World! This is a simple test document."))
        .add_paragraph(paragraph("It contains two paragraphs of plain text."));

    let file = File::create(&path)?;
    docx.build().pack(file)?;
    Ok(())
}

/// Generate a DOCX mixing scripts, to check text survives conversion intact.
fn generate_multiscript_docx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("multiscript.docx");
    println!("  Creating: {}", path.display());

    let lines = [
        "English: The quick brown fox jumps over the lazy dog.",
        "Tiếng Việt: Chuyển đổi tài liệu sang định dạng PDF.",
        "日本語: 文書をPDFに変換します。",
        "中文: 将文档转换为PDF格式。",
        "한국어: 문서를 PDF로 변환합니다.",
        "العربية: تحويل المستندات إلى PDF.",
        "Русский: Преобразование документов в PDF.",
        "Symbols: € £ ¥ © ® ™ ✓ → ∑ √ ∞",
    ];

    let mut docx = Docx::new().add_paragraph(heading("Multi-Script Document", 40));
    for line in lines {
        docx = docx.add_paragraph(paragraph(line));
    }

    let file = File::create(&path)?;
    docx.build().pack(file)?;
    Ok(())
}

/// Generate a multi-page DOCX.
fn generate_multipage_docx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("multipage.docx");
    println!("  Creating: {}", path.display());

    let mut docx = Docx::new().add_paragraph(heading("Multi-Page Document Test", 48));

    for i in 1..=50 {
        let text = format!(
            "This is paragraph {} of the multi-page test document. Lorem ipsum dolor sit amet, \
             consectetur adipiscing elit. Sed do eiusmod tempor incididunt ut labore et dolore \
             magna aliqua. Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris \
             nisi ut aliquip ex ea commodo consequat.",
            i
        );
        docx = docx.add_paragraph(paragraph(&text));
    }

    docx = docx
        .add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)))
        .add_paragraph(heading("Final Page", 36))
        .add_paragraph(paragraph("This is the last page of the document."));

    let file = File::create(&path)?;
    docx.build().pack(file)?;
    Ok(())
}

/// Generate a DOCX with a table.
fn generate_tables_docx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("tables.docx");
    println!("  Creating: {}", path.display());

    let cell = |text: &str, bold: bool| {
        let run = Run::new().add_text(text);
        let run = if bold { run.bold() } else { run };
        TableCell::new().add_paragraph(Paragraph::new().add_run(run))
    };

    let mut rows = vec![TableRow::new(vec![
        cell("Item", true),
        cell("Quantity", true),
        cell("Price", true),
    ])];
    for (item, qty, price) in [("Widget A", "10", "$5.00"), ("Widget B", "25", "$3.50")] {
        rows.push(TableRow::new(vec![
            cell(item, false),
            cell(qty, false),
            cell(price, false),
        ]));
    }
    let table = DocxTable::new(rows).set_grid(vec![3000, 1500, 1500]);

    let docx = Docx::new()
        .add_paragraph(heading("Table Test Document", 48))
        .add_table(table);

    let file = File::create(&path)?;
    docx.build().pack(file)?;
    Ok(())
}

/// Generate a workbook with a narrow `Summary`, a wide `Detail` and an empty sheet.
fn generate_report_xlsx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("q1.xlsx");
    println!("  Creating: {}", path.display());

    let mut workbook = Workbook::new();
    let header = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin);

    let summary = workbook.add_worksheet().set_name("Summary")?;
    summary.write_string_with_format(0, 0, "Region", &header)?;
    summary.write_string_with_format(0, 1, "Revenue", &header)?;
    let regions = ["North", "South", "East", "West"];
    let revenue = [125_000.0, 98_500.0, 143_250.0, 87_900.0];
    for (i, (region, amount)) in regions.iter().zip(revenue.iter()).enumerate() {
        let row = (i + 1) as u32;
        summary.write_string(row, 0, *region)?;
        summary.write_number(row, 1, *amount)?;
    }

    let detail = workbook.add_worksheet().set_name("Detail")?;
    for col in 0..40u16 {
        detail.write_string_with_format(0, col, format!("Metric {}", col + 1), &header)?;
    }
    for row in 1..=300u32 {
        for col in 0..40u16 {
            detail.write_number(row, col, f64::from(row) * f64::from(col + 1))?;
        }
    }

    workbook.add_worksheet().set_name("Blank")?;

    workbook.save(&path)?;
    Ok(())
}

/// Generate a workbook whose sheet names are matched by a wildcard rule.
fn generate_yearly_xlsx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("yearly.xlsx");
    println!("  Creating: {}", path.display());

    let mut workbook = Workbook::new();
    for year in [2024, 2025] {
        let sheet = workbook.add_worksheet().set_name(format!("Data {year}"))?;
        sheet.write_string(0, 0, "Month")?;
        sheet.write_string(0, 1, "Orders")?;
        for month in 1..=12u32 {
            sheet.write_string(month, 0, format!("{year}-{month:02}"))?;
            sheet.write_number(month, 1, f64::from(month * 37 % 101))?;
        }
    }
    let notes = workbook.add_worksheet().set_name("Notes")?;
    notes.write_string(0, 0, "Ghi chú: số liệu chưa kiểm toán")?;

    workbook.save(&path)?;
    Ok(())
}

/// Generate a UTF-8 CSV.
fn generate_ledger_csv(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("ledger.csv");
    println!("  Creating: {}", path.display());

    let mut file = File::create(&path)?;
    writeln!(file, "Date,Description,Amount")?;
    for day in 1..=40 {
        writeln!(file, "2025-03-{:02},Cà phê sữa đá #{},{:.2}", day % 28 + 1, day, day as f64 * 1.75)?;
    }
    Ok(())
}

/// Generate a corrupt DOCX for error handling tests.
fn generate_corrupt_docx(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("corrupt.docx");
    println!("  Creating: {}", path.display());

    let mut file = File::create(&path)?;
    file.write_all(b"This is not a valid DOCX file. It's just garbage data.")?;
    Ok(())
}

/// Write a configuration matching the generated tree.
fn generate_config(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("config.yaml");
    println!("  Creating: {}", path.display());

    let config = r#"logging:
  level: info
  log_dir: ./logs
  console_lines: 20
conversion:
  input_root: tests/fixtures/output
  output_root: tests/fixtures/pdf
  workers: 4
  timeout_minutes: 5
excel:
  rules:
    - priority: 1
      sheets: ["Summary"]
      scaling: fit_columns
      print_row_col_headings: true
    - priority: 2
      sheets: ["Data *"]
      mode: one_page
      rows_per_page: 6
    - priority: 99
      scaling: no_scaling
      margins: narrow
powerpoint:
  include_hidden: false
"#;
    fs::write(&path, config)?;
    Ok(())
}
