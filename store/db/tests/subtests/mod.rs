use orb_db::{Store, StoreExt};

pub fn write_bin<DB>(db: &DB)
where
    DB: Store,
{
    let key = "1";
    let value = [1];
    db.write(key, value).unwrap();
}

pub fn read_bin<DB>(db: &DB)
where
    DB: Store,
{
    let key = "0";
    let value = [1];
    db.write(key, value).unwrap();
    let res = db.read(key).unwrap().unwrap();
    assert_eq!(value.as_ref(), res.as_slice());
}

pub fn write_read_obj<DB>(db: &DB)
where
    DB: Store,
{
    let key = "Cthulhu";
    let value = 42;
    db.write_obj(key, &value).unwrap();
    let res: i32 = db.read_obj(key).unwrap().unwrap();
    assert_eq!(value, res);

    // ensure that we are able to overwrite the value
    let value = 1337;
    db.write_obj(key, &value).unwrap();
    let res: i32 = db.read_obj(key).unwrap().unwrap();
    assert_eq!(value, res);
}

pub fn exists<DB>(db: &DB)
where
    DB: Store,
{
    let key = "0";
    let value = [1];
    db.write(key, value).unwrap();
    let res = db.exists(key).unwrap();
    assert!(res);
}

pub fn does_not_exist<DB>(db: &DB)
where
    DB: Store,
{
    let key = "Azathoth";

    assert!(!db.exists(key).unwrap());
    assert!(db.read_obj::<_, i32>(key).unwrap().is_none());
    assert!(db.require_obj::<_, i32>(key).is_err());
}

pub fn delete<DB>(db: &DB)
where
    DB: Store,
{
    let key = "to-delete";
    db.write(key, [9]).unwrap();
    assert!(db.exists(key).unwrap());
    db.delete(key).unwrap();
    assert!(!db.exists(key).unwrap());
    // deleting a missing key is not an error
    db.delete(key).unwrap();
}

pub fn scan_prefix<DB>(db: &DB)
where
    DB: Store,
{
    db.write("/activity/a/0001", [1]).unwrap();
    db.write("/activity/a/0002", [2]).unwrap();
    db.write("/activity/b/0001", [3]).unwrap();
    db.write("/anchor/a", [4]).unwrap();

    let entries = db.scan_prefix("/activity/a/").unwrap();
    assert_eq!(entries.len(), 2);
    // key-ordered
    assert_eq!(entries[0].0, b"/activity/a/0001".to_vec());
    assert_eq!(entries[1].0, b"/activity/a/0002".to_vec());

    assert!(db.scan_prefix("/nonexistent/").unwrap().is_empty());
}
