mod coin_snapshots;
