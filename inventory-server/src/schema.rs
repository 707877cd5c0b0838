diesel::table! {
    skus (id) {
        id -> Uuid,
        name -> Varchar,
        category -> Varchar,
        description -> Text,
        price -> Numeric,
        version -> Int4,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stores (id) {
        id -> Uuid,
        name -> Varchar,
        address -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    inventory (id) {
        id -> Uuid,
        sku_id -> Uuid,
        store_id -> Uuid,
        quantity -> Int4,
        version -> Int4,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox (id) {
        id -> Uuid,
        operation_type -> Varchar,
        sender_instance_id -> Varchar,
        inventory_id -> Uuid,
        sku_id -> Uuid,
        sku_name -> Varchar,
        store_id -> Uuid,
        store_name -> Varchar,
        user_id -> Uuid,
        user_name -> Varchar,
        delta_quantity -> Int4,
        new_quantity -> Int4,
        version -> Int4,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(inventory -> skus (sku_id));
diesel::joinable!(inventory -> stores (store_id));

diesel::allow_tables_to_appear_in_same_query!(
    skus,
    stores,
    inventory,
    outbox,
);
