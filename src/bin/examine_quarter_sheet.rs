use calamine::{open_workbook_auto, Reader};
use energy_trends::importers::quarter_sheet::{WideTable, HEADER_OFFSET, QUARTER_SHEET};
use energy_trends::quarter::quarter_token;
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let file_path = args
        .get(1)
        .ok_or("usage: examine-quarter-sheet <workbook.xlsx>")?;

    println!("Opening workbook: {file_path}");
    let mut workbook = open_workbook_auto(file_path)?;

    println!("\nSheet names:");
    for (i, name) in workbook.sheet_names().iter().enumerate() {
        println!("  {i}: {name}");
    }

    let range = workbook.worksheet_range(QUARTER_SHEET)?;
    println!("\nExamining sheet: {QUARTER_SHEET}");
    println!("{}", "=".repeat(100));
    println!("Dimensions: {:?}", range.get_size());
    println!("Header taken from row {} (after {} skipped rows)", HEADER_OFFSET + 1, HEADER_OFFSET);

    let table = WideTable::from_range(&range)?;

    println!("\nColumns:");
    for (idx, column) in table.columns.iter().enumerate() {
        match quarter_token(column) {
            Some(token) => println!("  {idx:3}: {column}  ->  {token}"),
            None => println!("  {idx:3}: {column}"),
        }
    }

    println!("\nRows (first column, by ordinal):");
    for (ordinal, row) in table.rows.iter().enumerate() {
        let label = row.first().map(|c| c.as_text()).unwrap_or_default();
        println!("  {ordinal:3}: {label}");
    }

    println!("\n{}", "=".repeat(100));
    println!("Quarter columns: {}", table.quarter_columns().count());
    match table.newest_quarter() {
        Ok(newest) => println!("Newest quarter: {newest}"),
        Err(e) => println!("Newest quarter: <error: {e}>"),
    }

    Ok(())
}
