use trigram_lookup::{build_index, load_index, lookup, save_index};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // index some strings
    let strings = vec![
        "helsinki".to_string(),
        "helsingfors".to_string(),
        "stockholm".to_string(),
        "copenhagen".to_string(),
        "oslo".to_string(),
        "reykjavik".to_string(),
    ];
    let index = build_index(strings)?;

    // batched lookup, including a typo
    let queries = ["helsinki", "helsinky", "osol"];
    let results = lookup(&queries, &index, 3)?;
    for (query, hits) in queries.iter().zip(&results) {
        println!("{query}:");
        for (hit, sim) in hits {
            println!("  {sim:.4}  {hit}");
        }
    }

    // persist and reload (reload is always host-resident)
    let path = std::env::temp_dir().join("trigram-lookup-basic.idx");
    save_index(&index, &path)?;
    let reloaded = load_index(&path)?;
    println!(
        "reloaded {} strings, residency {:?}",
        reloaded.len(),
        reloaded.residency()
    );
    std::fs::remove_file(&path).ok();
    Ok(())
}
