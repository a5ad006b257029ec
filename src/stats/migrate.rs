use crate::prelude::*;

use crate::stats::cache::{round1, CacheStore, YearCache};

/// Fills in `total_load` fields on files written before that field existed.
/// Each migrated file gets a one-time `.json.backup` sibling first.
pub fn migrate_device(store: &CacheStore, device_id: &str) -> Result<usize> {
    let mut migrated = 0;

    for year in store.list_years(device_id) {
        let mut cache = store.load(device_id, year);
        if !needs_migration(&cache) {
            continue;
        }

        let path = store.year_path(device_id, year);
        let backup = path.with_extension("json.backup");
        if !backup.exists() {
            std::fs::copy(&path, &backup).map_err(|err| {
                anyhow!("error writing backup {}: {}", backup.display(), err)
            })?;
            info!("wrote migration backup {}", backup.display());
        }

        apply(&mut cache);
        store.save(device_id, year, &cache)?;
        info!("migrated {}/{}: filled total_load", device_id, year);
        migrated += 1;
    }

    Ok(migrated)
}

fn needs_migration(cache: &YearCache) -> bool {
    if cache.daily.values().any(|r| r.total_load.is_none()) {
        return true;
    }

    let m = &cache.monthly;
    for i in 0..12 {
        if m.total_load[i] == 0.0 && (m.load[i] != 0.0 || m.essential[i] != 0.0) {
            return true;
        }
    }

    let y = &cache.yearly_total;
    y.total_load == 0.0 && (y.load != 0.0 || y.essential != 0.0)
}

fn apply(cache: &mut YearCache) {
    for record in cache.daily.values_mut() {
        if record.total_load.is_none() {
            record.total_load = Some(round1(record.load + record.essential));
        }
    }

    let m = &mut cache.monthly;
    for i in 0..12 {
        if m.total_load[i] == 0.0 && (m.load[i] != 0.0 || m.essential[i] != 0.0) {
            m.total_load[i] = round1(m.load[i] + m.essential[i]);
        }
    }

    let y = &mut cache.yearly_total;
    if y.total_load == 0.0 && (y.load != 0.0 || y.essential != 0.0) {
        y.total_load = round1(y.load + y.essential);
    }
}
