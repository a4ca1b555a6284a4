use petek::{Region, StmError, Transaction};
use rand::Rng;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

fn read_u64(region: &Region, tx: &mut Transaction, addr: u64) -> Result<u64, StmError> {
    let mut buf = [0u8; 8];
    region.read(tx, addr, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_u64(region: &Region, tx: &mut Transaction, addr: u64, value: u64) {
    region.write(tx, &value.to_le_bytes(), addr).unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_counter() {
    let region = Arc::new(Region::new(64, 8));
    let addr = region.start();

    let threads = 8u64;
    let increments = 200u64;

    let mut handles = vec![];
    for _ in 0..threads {
        let region = region.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..increments {
                region.atomically(false, |r, tx| {
                    let v = read_u64(r, tx, addr)?;
                    write_u64(r, tx, addr, v + 1);
                    Ok(())
                });
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let total = region.atomically(true, |r, tx| read_u64(r, tx, addr));
    assert_eq!(total, threads * increments);
}

#[test]
#[cfg_attr(miri, ignore)]
fn bank_transfer_conservation() {
    let region = Arc::new(Region::new(64, 8));
    let accounts = 8u64;
    let start = region.start();

    let mut tx = region.begin(false);
    for i in 0..accounts {
        write_u64(&region, &mut tx, start + i * 8, 1000);
    }
    region.commit(tx).unwrap();

    let threads = 4;
    let transfers = 300;

    let mut handles = vec![];
    for _ in 0..threads {
        let region = region.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..transfers {
                let from = start + rng.gen_range(0..accounts) * 8;
                let to = start + rng.gen_range(0..accounts) * 8;
                if from == to {
                    continue;
                }
                let amount = rng.gen_range(1..=10u64);
                region.atomically(false, |r, tx| {
                    let from_bal = read_u64(r, tx, from)?;
                    let to_bal = read_u64(r, tx, to)?;
                    if from_bal >= amount {
                        write_u64(r, tx, from, from_bal - amount);
                        write_u64(r, tx, to, to_bal + amount);
                    }
                    Ok(())
                });
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    // Money is conserved across every interleaving.
    let total = region.atomically(true, |r, tx| {
        let mut sum = 0;
        for i in 0..accounts {
            sum += read_u64(r, tx, start + i * 8)?;
        }
        Ok(sum)
    });
    assert_eq!(total, accounts * 1000);
}

#[test]
#[cfg_attr(miri, ignore)]
fn readers_never_observe_half_a_commit() {
    let region = Arc::new(Region::new(64, 8));
    let w0 = region.start();
    let w1 = region.start() + 8;

    let updates = 500u64;

    let writer = {
        let region = region.clone();
        thread::spawn(move || {
            for _ in 0..updates {
                region.atomically(false, |r, tx| {
                    let a = read_u64(r, tx, w0)?;
                    let b = read_u64(r, tx, w1)?;
                    write_u64(r, tx, w0, a + 1);
                    write_u64(r, tx, w1, b + 1);
                    Ok(())
                });
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let region = region.clone();
        readers.push(thread::spawn(move || {
            for _ in 0..updates {
                // One range read spanning the pair: both words come from
                // the same snapshot or the transaction retries.
                let (a, b) = region.atomically(true, |r, tx| {
                    let mut buf = [0u8; 16];
                    r.read(tx, w0, &mut buf)?;
                    Ok((
                        u64::from_le_bytes(buf[..8].try_into().unwrap()),
                        u64::from_le_bytes(buf[8..].try_into().unwrap()),
                    ))
                });
                assert_eq!(a, b, "torn pair: ({}, {})", a, b);
            }
        }));
    }

    writer.join().unwrap();
    for h in readers {
        h.join().unwrap();
    }

    let final_pair = region.atomically(true, |r, tx| {
        Ok((read_u64(r, tx, w0)?, read_u64(r, tx, w1)?))
    });
    assert_eq!(final_pair, (updates, updates));
}

#[test]
#[cfg_attr(miri, ignore)]
fn contended_commit_has_exactly_one_winner() {
    let region = Arc::new(Region::new(64, 8));
    let addr = region.start();
    let clock0 = region.clock();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = vec![];
    for value in 1..=2u64 {
        let region = region.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            let mut tx = region.begin(false);
            write_u64(&region, &mut tx, addr, value);
            barrier.wait();
            region.commit(tx).is_ok()
        }));
    }

    let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|&&won| won).count(), 1);
    // The loser failed before touching the clock.
    assert_eq!(region.clock(), clock0 + 1);

    let value = region.atomically(true, |r, tx| read_u64(r, tx, addr));
    assert!(value == 1 || value == 2);
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_allocation_yields_distinct_segments() {
    let region = Arc::new(Region::new(64, 8));
    let bases = Arc::new(Mutex::new(Vec::new()));

    let mut handles = vec![];
    for _ in 0..4 {
        let region = region.clone();
        let bases = bases.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                let base = region.alloc(16).unwrap();
                bases.lock().unwrap().push(base);
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let mut bases = bases.lock().unwrap().clone();
    assert_eq!(bases.len(), 80);
    bases.sort_unstable();
    bases.dedup();
    assert_eq!(bases.len(), 80, "segment ids were reused");

    for &base in &bases {
        assert_ne!(base, 0);
        assert_ne!(base, region.start());
        let zeros = region.atomically(true, |r, tx| {
            let mut buf = [0xFFu8; 16];
            r.read(tx, base, &mut buf)?;
            Ok(buf == [0u8; 16])
        });
        assert!(zeros);
    }
}
