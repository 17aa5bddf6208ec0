use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use berth::collab::{AdminList, InMemoryTravelDesk};
use berth::engine::Engine;
use berth::notify::NotifyHub;
use berth::wire;

const PASSWORD: &str = "berth";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("berth_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let desk = Arc::new(InMemoryTravelDesk::new());
    let engine = Arc::new(
        Engine::new(dir.join("berth.wal"), Arc::new(NotifyHub::new()))
            .unwrap()
            .with_travel_desk(desk.clone())
            .with_authorizer(Arc::new(AdminList::new(["facilities"]))),
    );

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            let desk = desk.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, desk, PASSWORD.to_string(), None)
                    .await;
            });
        }
    });

    (addr, engine)
}

async fn connect_as(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("berth")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn query_rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

struct Site {
    house: Ulid,
    double: Ulid,
    single: Ulid,
    arif: Ulid,
    citra: Ulid,
}

/// One field-camp house with two rooms and two staff of different genders.
async fn seed(client: &Client) -> Site {
    let site = Site {
        house: Ulid::new(),
        double: Ulid::new(),
        single: Ulid::new(),
        arif: Ulid::new(),
        citra: Ulid::new(),
    };
    let statements = [
        format!(
            "INSERT INTO staff_houses (id, name, location) VALUES ('{}', 'Camp Alpha', 'Field Camp')",
            site.house
        ),
        format!(
            "INSERT INTO rooms (id, staff_house_id, name, room_type, capacity) VALUES ('{}', '{}', 'R101', 'Double', 2)",
            site.double, site.house
        ),
        format!(
            "INSERT INTO rooms (id, staff_house_id, name) VALUES ('{}', '{}', 'R102')",
            site.single, site.house
        ),
        format!(
            "INSERT INTO occupants (id, name, staff_number, gender) VALUES ('{}', 'Arif', 'S-001', 'Male')",
            site.arif
        ),
        format!(
            "INSERT INTO occupants (id, name, gender) VALUES ('{}', 'Citra', 'Female')",
            site.citra
        ),
    ];
    for sql in &statements {
        client.batch_execute(sql).await.unwrap();
    }
    site
}

// ── Bookings over the wire ───────────────────────────────────

#[tokio::test]
async fn range_booking_returns_one_row_per_night() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    let rows = query_rows(
        &client,
        &format!(
            "INSERT INTO bookings (room_id, occupant_id, check_in, check_out, notes) \
             VALUES ('{}', '{}', '2024-03-01', '2024-03-03', 'site visit') RETURNING id, date",
            site.double, site.arif
        ),
    )
    .await;

    let dates: Vec<&str> = rows.iter().map(|r| r.get("date").unwrap()).collect();
    assert_eq!(dates, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);
    for row in &rows {
        assert!(row.get("id").unwrap().parse::<Ulid>().is_ok());
    }

    let listed = query_rows(
        &client,
        &format!(
            "SELECT * FROM bookings WHERE year = 2024 AND month = 3 AND staff_house_id = '{}'",
            site.house
        ),
    )
    .await;
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].get("room_name"), Some("R101"));
    assert_eq!(listed[0].get("house_name"), Some("Camp Alpha"));
    assert_eq!(listed[0].get("location"), Some("Field Camp"));
    assert_eq!(listed[0].get("occupant_name"), Some("Arif"));
    assert_eq!(listed[0].get("occupant_gender"), Some("Male"));
    assert_eq!(listed[0].get("status"), Some("Confirmed"));
    assert_eq!(listed[0].get("notes"), Some("site visit"));
    assert_eq!(listed[0].get("trf_id"), None);
}

#[tokio::test]
async fn conflicts_surface_as_exclusion_violations() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, occupant_id, date) VALUES ('{}', '{}', '2024-03-02')",
            site.double, site.arif
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, occupant_id, check_in, check_out) \
             VALUES ('{}', '{}', '2024-03-01', '2024-03-03')",
            site.double, site.citra
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, date) VALUES ('{}', '2024-03-02')",
            site.double
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let listed = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE year = 2024 AND month = 3 AND room_id = '{}'", site.double),
    )
    .await;
    assert_eq!(listed.len(), 1, "failed requests must leave nothing behind");
}

#[tokio::test]
async fn bad_requests_map_to_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    let err = client
        .batch_execute(&format!("INSERT INTO bookings (room_id) VALUES ('{}')", site.single))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    let err = client
        .batch_execute("INSERT INTO bookings (room_id, date) VALUES ('not-a-ulid', '2024-03-01')")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));

    let err = client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("02000"));

    let err = client.batch_execute("SELECT * FROM guests").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));

    let err = client
        .batch_execute("SELECT * FROM bookings; SELECT * FROM bookings")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn forced_block_displaces_and_is_lifted() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    let booked = query_rows(
        &client,
        &format!(
            "INSERT INTO bookings (room_id, occupant_id, date) VALUES ('{}', '{}', '2024-03-05') RETURNING id, date",
            site.single, site.citra
        ),
    )
    .await;
    let booking_id = booked[0].get("id").unwrap().to_string();

    let blocked = query_rows(
        &client,
        &format!(
            "INSERT INTO bookings (room_id, date, status, block_reason, force_block) \
             VALUES ('{}', '2024-03-05', 'Blocked', 'leaking roof', true) RETURNING id, date",
            site.single
        ),
    )
    .await;
    let block_id = blocked[0].get("id").unwrap().to_string();

    let listed = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE year = 2024 AND month = 3 AND room_id = '{}'", site.single),
    )
    .await;
    let status_of = |id: &str| {
        listed
            .iter()
            .find(|r| r.get("id") == Some(id))
            .and_then(|r| r.get("status"))
            .map(str::to_string)
    };
    assert_eq!(status_of(&booking_id).as_deref(), Some("Cancelled"));
    assert_eq!(status_of(&block_id).as_deref(), Some("Blocked"));

    // A booking can't be lifted as if it were a block.
    let err = client
        .batch_execute(&format!("DELETE FROM blocks WHERE id = '{booking_id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    client
        .batch_execute(&format!("DELETE FROM blocks WHERE id = '{block_id}'"))
        .await
        .unwrap();
    let free = query_rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE staff_house_id = '{}' AND check_in = '2024-03-05' AND check_out = '2024-03-05'",
            site.house
        ),
    )
    .await;
    assert_eq!(free.len(), 2);
}

#[tokio::test]
async fn status_updates_and_moves() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    let booked = query_rows(
        &client,
        &format!(
            "INSERT INTO bookings (room_id, occupant_id, date) VALUES ('{}', '{}', '2024-04-10') RETURNING id, date",
            site.double, site.arif
        ),
    )
    .await;
    let id = booked[0].get("id").unwrap().to_string();

    client
        .batch_execute(&format!(
            "UPDATE bookings SET room_id = '{}', notes = 'moved' WHERE id = '{id}'",
            site.single
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UPDATE bookings SET status = 'Checked-in' WHERE id = '{id}'"))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("UPDATE bookings SET status = 'Confirmed' WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("55000"));

    let listed = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE year = 2024 AND month = 4 AND occupant_id = '{}'", site.arif),
    )
    .await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("room_name"), Some("R102"));
    assert_eq!(listed[0].get("status"), Some("Checked-in"));
    assert_eq!(listed[0].get("notes"), Some("moved"));

    let free = query_rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE staff_house_id = '{}' AND check_in = '2024-04-09' AND check_out = '2024-04-11'",
            site.house
        ),
    )
    .await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].get("name"), Some("R101"));
    assert_eq!(free[0].get("capacity"), Some("2"));
}

#[tokio::test]
async fn travel_requests_drive_bookings_and_log() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO travel_requests (id, requestor, depart, return_date, approval) \
             VALUES ('TRF-0042', '{}', '2024-05-01', '2024-05-02', 'Approved')",
            site.citra
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO travel_requests (id, requestor, approval) VALUES ('TRF-0043', '{}', 'Rejected')",
            site.arif
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, check_in, check_out, trf_id) \
             VALUES ('{}', '2024-05-01', '2024-05-02', 'TRF-0042')",
            site.single
        ))
        .await
        .unwrap();

    let listed = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE year = 2024 AND month = 5 AND occupant_id = '{}'", site.citra),
    )
    .await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].get("trf_id"), Some("TRF-0042"));

    let log = query_rows(&client, "SELECT * FROM travel_request_log WHERE trf_id = 'TRF-0042'").await;
    assert_eq!(log.len(), 1);
    assert!(log[0].get("entry").unwrap().contains("facilities"));

    // Rejected requests can't acquire rooms.
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, date, trf_id) VALUES ('{}', '2024-05-10', 'TRF-0043')",
            site.double
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));
}

#[tokio::test]
async fn privileged_statements_need_an_admin_login() {
    let (addr, _engine) = start_test_server().await;
    let admin = connect_as(addr, "facilities").await;
    let site = seed(&admin).await;
    let traveller = connect_as(addr, "traveller").await;

    traveller
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, occupant_id, date) VALUES ('{}', '{}', '2024-06-01')",
            site.double, site.arif
        ))
        .await
        .unwrap();

    let err = traveller
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, date, status) VALUES ('{}', '2024-06-02', 'Blocked')",
            site.double
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));

    let err = traveller
        .batch_execute(&format!(
            "UPDATE rooms SET status = 'Maintenance' WHERE id = '{}'",
            site.single
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));

    let err = traveller
        .batch_execute(&format!(
            "INSERT INTO staff_houses (id, name, location) VALUES ('{}', 'Port Lodge', 'Port Site')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _engine) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("berth")
        .user("facilities")
        .password("not-the-password");
    assert!(config.connect(NoTls).await.is_err());
}

#[tokio::test]
async fn parameterized_booking_via_extended_protocol() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    let room = site.double.to_string();
    let occupant = site.arif.to_string();
    let rows = client
        .query(
            "INSERT INTO bookings (room_id, occupant_id, date) VALUES ($1, $2, $3) RETURNING id, date",
            &[&room, &occupant, &"2024-07-04"],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let date: &str = rows[0].get("date");
    assert_eq!(date, "2024-07-04");
}

#[tokio::test]
async fn bound_notes_with_dollar_signs_are_stored_verbatim() {
    let (addr, _engine) = start_test_server().await;
    let client = connect_as(addr, "facilities").await;
    let site = seed(&client).await;

    let room = site.double.to_string();
    let rows = client
        .query(
            "INSERT INTO bookings (room_id, date, notes) VALUES ($1, $2, $3) RETURNING id, date",
            &[&room, &"2024-07-04", &"deposit $1 paid, ref '$2'"],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: &str = rows[0].get("id");

    let listed = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE year = 2024 AND month = 7 AND room_id = '{room}'"),
    )
    .await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("notes"), Some("deposit $1 paid, ref '$2'"));

    let cleared = client
        .execute("UPDATE bookings SET notes = $1 WHERE id = $2", &[&None::<&str>, &id])
        .await
        .unwrap();
    assert_eq!(cleared, 1);
    let listed = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE year = 2024 AND month = 7 AND room_id = '{room}'"),
    )
    .await;
    assert_eq!(listed[0].get("notes"), None);
}
